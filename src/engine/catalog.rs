use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::Mutex;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

fn validate_service(service: &Service) -> Result<(), EngineError> {
    if service.name.trim().is_empty() || service.name.len() > MAX_SERVICE_NAME_LEN {
        return Err(EngineError::validation("service name must be 1-200 characters"));
    }
    if service.duration_ms < MINUTE || service.duration_ms > MAX_SERVICE_DURATION_MS {
        return Err(EngineError::validation("duration must be between 1 minute and 12 hours"));
    }
    if service.duration_ms % MINUTE != 0 {
        return Err(EngineError::validation("duration must be whole minutes"));
    }
    if !(0..=MAX_PRICE).contains(&service.price) {
        return Err(EngineError::validation("price must be between 0 and 1000000.00"));
    }
    if service.buffer_ms.is_some_and(|b| !(0..=MAX_BUFFER_MS).contains(&b)) {
        return Err(EngineError::validation("buffer out of range"));
    }
    if let Some(policy) = &service.deposit {
        policy.validate().map_err(EngineError::validation)?;
    }
    Ok(())
}

fn validate_settings(settings: &ReservationSettings) -> Result<(), EngineError> {
    if settings.min_notice_ms < 0 || settings.min_notice_ms > i64::from(MAX_DAYS_OUT) * DAY {
        return Err(EngineError::validation("minimum notice out of range"));
    }
    if !(0..=MAX_BUFFER_MS).contains(&settings.buffer_ms) {
        return Err(EngineError::validation("buffer out of range"));
    }
    if settings.max_days_out == 0 || settings.max_days_out > MAX_DAYS_OUT {
        return Err(EngineError::validation("max days out must be between 1 and 730"));
    }
    if !(MIN_HOLD_TTL_MS..=MAX_HOLD_TTL_MS).contains(&settings.hold_ttl_ms) {
        return Err(EngineError::validation("hold TTL must be between 1 minute and 24 hours"));
    }
    if let Some(policy) = &settings.default_deposit {
        policy.validate().map_err(EngineError::validation)?;
    }
    Ok(())
}

impl Engine {
    pub fn service(&self, id: Ulid) -> Option<Service> {
        self.services.get(&id).map(|s| s.value().clone())
    }

    pub fn services(&self) -> Vec<Service> {
        let mut all: Vec<Service> = self.services.iter().map(|s| s.value().clone()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Catalog sync. Existing reservations keep the buffer and deposit they
    /// were created with.
    pub async fn upsert_service(&self, service: Service) -> Result<Service, EngineError> {
        validate_service(&service)?;
        self.commit_global(&Event::ServiceUpserted {
            service: service.clone(),
        })
        .await?;
        Ok(service)
    }

    pub async fn update_settings(&self, settings: ReservationSettings) -> Result<ReservationSettings, EngineError> {
        validate_settings(&settings)?;
        self.commit_global(&Event::SettingsUpdated {
            settings: settings.clone(),
        })
        .await?;
        tracing::info!(timezone = %settings.timezone, hold_ttl_ms = settings.hold_ttl_ms, "settings updated");
        Ok(settings)
    }

    pub async fn upsert_rule(&self, rule: AvailabilityRule) -> Result<AvailabilityRule, EngineError> {
        if rule.day_of_week > 6 {
            return Err(EngineError::validation("day_of_week must be 0 (Sunday) to 6"));
        }
        if rule.open >= rule.close {
            return Err(EngineError::validation("open must be before close"));
        }
        let schedule = self.schedule();
        if schedule.rules.len() >= MAX_RULES && !schedule.rules.iter().any(|r| r.id == rule.id) {
            return Err(EngineError::LimitExceeded("too many availability rules"));
        }
        self.commit_global(&Event::RuleUpserted { rule: rule.clone() })
            .await?;
        Ok(rule)
    }

    pub async fn remove_rule(&self, id: Ulid) -> Result<(), EngineError> {
        if !self.schedule().rules.iter().any(|r| r.id == id) {
            return Err(EngineError::NotFound(id));
        }
        self.commit_global(&Event::RuleRemoved { id }).await
    }

    pub async fn add_blackout(&self, blackout: BlackoutDate) -> Result<BlackoutDate, EngineError> {
        if blackout.reason.as_ref().is_some_and(|r| r.len() > MAX_NOTES_LEN) {
            return Err(EngineError::validation("reason is too long"));
        }
        if self.schedule().blackouts.len() >= MAX_BLACKOUTS {
            return Err(EngineError::LimitExceeded("too many blackout dates"));
        }
        self.commit_global(&Event::BlackoutAdded {
            blackout: blackout.clone(),
        })
        .await?;
        Ok(blackout)
    }

    /// Returns false if the date was not blacked out.
    pub async fn remove_blackout(&self, date: NaiveDate) -> Result<bool, EngineError> {
        if !self.schedule().blackouts.contains_key(&date) {
            return Ok(false);
        }
        self.commit_global(&Event::BlackoutRemoved { date }).await?;
        Ok(true)
    }

    // ── Storefront catalog ───────────────────────────────────

    pub async fn variant(&self, id: Ulid) -> Option<Variant> {
        let v = self.variants.get(&id).map(|v| v.value().clone())?;
        let guard = v.lock().await;
        Some(guard.clone())
    }

    pub async fn variants(&self) -> Vec<Variant> {
        let handles: Vec<Arc<Mutex<Variant>>> = self.variants.iter().map(|v| v.value().clone()).collect();
        let mut all = Vec::with_capacity(handles.len());
        for handle in handles {
            all.push(handle.lock().await.clone());
        }
        all.sort_by(|a, b| a.sku.cmp(&b.sku));
        all
    }

    /// Create or replace a variant, including its on-hand quantity.
    /// Serialized with order placement on the variant's lock.
    pub async fn upsert_variant(&self, variant: Variant) -> Result<Variant, EngineError> {
        if variant.sku.trim().is_empty() || variant.sku.len() > MAX_SKU_LEN {
            return Err(EngineError::validation("sku must be 1-64 characters"));
        }
        if variant.name.len() > MAX_SERVICE_NAME_LEN {
            return Err(EngineError::validation("variant name is too long"));
        }
        if !(0..=MAX_PRICE).contains(&variant.price) {
            return Err(EngineError::validation("price must be between 0 and 1000000.00"));
        }
        let event = Event::VariantUpserted {
            variant: variant.clone(),
        };
        let existing = self.variants.get(&variant.id).map(|v| v.value().clone());
        match existing {
            Some(handle) => {
                let mut guard = handle.lock().await;
                self.commit(&event, || *guard = variant.clone()).await?;
            }
            None => self.commit_global(&event).await?,
        }
        Ok(variant)
    }
}
