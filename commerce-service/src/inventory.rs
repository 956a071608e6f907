use chrono::Utc;
use std::sync::Arc;

use crate::errors::{CommerceError, CommerceResult};
use crate::events::{CommerceEvent, Notifier};
use crate::models::{
    page_window, Availability, LineResult, Page, ReorderSuggestion, StockFilter, StockKey, StockLine,
    StockRecord, StockThresholds,
};
use crate::store::{InventoryStore, MAX_WRITE_ATTEMPTS};

/// Stock ledger keyed by (variant, location).
///
/// Every mutation reads the record, derives the next state with the pure
/// transitions on `StockRecord`, and writes it conditioned on the version it
/// read. Losing the race means re-reading and re-checking, so two callers
/// can never both take the last unit.
#[derive(Clone)]
pub struct InventoryLedger {
    store: Arc<dyn InventoryStore>,
    notifier: Notifier,
}

#[derive(Debug, Clone, Copy)]
enum StockOp {
    Reserve,
    Release,
    Fulfill,
    Restock,
}

impl StockOp {
    fn name(&self) -> &'static str {
        match self {
            StockOp::Reserve => "reserve",
            StockOp::Release => "release",
            StockOp::Fulfill => "fulfill",
            StockOp::Restock => "restock",
        }
    }

    fn apply(&self, current: &StockRecord, qty: i64) -> CommerceResult<StockRecord> {
        match self {
            StockOp::Reserve => current.reserved(qty),
            StockOp::Release => Ok(current.released(qty)),
            StockOp::Fulfill => current.fulfilled(qty),
            StockOp::Restock => current.restocked(qty, Utc::now()),
        }
    }
}

/// Per-item results of a batch call. Nothing is rolled back on failure.
#[derive(Debug)]
pub struct BatchReport {
    pub results: Vec<(StockLine, CommerceResult<StockRecord>)>,
}

impl BatchReport {
    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(|(_, r)| r.is_ok())
    }

    pub fn succeeded(&self) -> Vec<StockLine> {
        self.results
            .iter()
            .filter(|(_, r)| r.is_ok())
            .map(|(line, _)| line.clone())
            .collect()
    }

    /// Takes the first failure out of the report.
    pub fn into_first_error(self) -> Option<CommerceError> {
        self.results.into_iter().find_map(|(_, r)| r.err())
    }

    pub fn into_line_results(self) -> Vec<LineResult> {
        self.results
            .into_iter()
            .map(|(line, result)| {
                let (success, error, stock) = match result {
                    Ok(stock) => (true, None, Some(stock)),
                    Err(e) => (false, Some(e.to_string()), None),
                };
                LineResult {
                    variant_id: line.variant_id,
                    location_id: line.location_id,
                    quantity: line.quantity,
                    success,
                    error,
                    stock,
                }
            })
            .collect()
    }
}

fn positive(qty: i64) -> CommerceResult<()> {
    if qty <= 0 {
        return Err(CommerceError::Validation(
            "Quantity must be positive".to_string(),
        ));
    }
    Ok(())
}

fn valid_thresholds(thresholds: &StockThresholds) -> CommerceResult<()> {
    if thresholds.low_stock_threshold < 0 || thresholds.reorder_point < 0 || thresholds.reorder_quantity < 0 {
        return Err(CommerceError::Validation(
            "Stock thresholds cannot be negative".to_string(),
        ));
    }
    Ok(())
}

impl InventoryLedger {
    pub fn new(store: Arc<dyn InventoryStore>, notifier: Notifier) -> Self {
        Self { store, notifier }
    }

    /// Creates the record on first assignment. Repeating it returns the
    /// stored record untouched.
    pub async fn assign(
        &self,
        key: &StockKey,
        on_hand: i64,
        thresholds: StockThresholds,
    ) -> CommerceResult<StockRecord> {
        if on_hand < 0 {
            return Err(CommerceError::Validation(
                "On-hand quantity cannot be negative".to_string(),
            ));
        }
        valid_thresholds(&thresholds)?;
        let now = Utc::now();
        let record = StockRecord {
            variant_id: key.variant_id.clone(),
            location_id: key.location_id.clone(),
            on_hand,
            reserved: 0,
            low_stock_threshold: thresholds.low_stock_threshold,
            reorder_point: thresholds.reorder_point,
            reorder_quantity: thresholds.reorder_quantity,
            last_restocked: None,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        let stored = self.store.insert_stock(&record).await?;
        tracing::info!(stock = %key, on_hand = stored.on_hand, "Stock assigned");
        Ok(stored)
    }

    pub async fn get(&self, key: &StockKey) -> CommerceResult<StockRecord> {
        self.store
            .find_stock(key)
            .await?
            .ok_or_else(|| CommerceError::StockNotFound {
                variant_id: key.variant_id.clone(),
                location_id: key.location_id.clone(),
            })
    }

    /// Replaces the alerting and reorder levels. Counts are left alone.
    pub async fn update_thresholds(
        &self,
        key: &StockKey,
        thresholds: StockThresholds,
    ) -> CommerceResult<StockRecord> {
        valid_thresholds(&thresholds)?;
        self.write(key, "thresholds", |current| Ok(current.with_thresholds(thresholds)))
            .await
    }

    /// Stock held at one location, optionally only the low or empty lines.
    pub async fn list_location(
        &self,
        location_id: &str,
        filter: StockFilter,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> CommerceResult<Page<StockRecord>> {
        let (limit, offset) = page_window(limit, offset);
        let matching: Vec<StockRecord> = self
            .store
            .list_stock(Some(location_id))
            .await?
            .into_iter()
            .filter(|s| !filter.low_stock_only || s.is_low_stock())
            .filter(|s| !filter.out_of_stock_only || s.is_out_of_stock())
            .collect();
        let total = matching.len() as i64;
        let items = matching
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        Ok(Page::new(items, total, offset))
    }

    /// Whether `qty` units could be reserved right now. Unknown stock is
    /// reported as unavailable rather than as an error.
    pub async fn check_availability(&self, key: &StockKey, qty: i64) -> CommerceResult<Availability> {
        positive(qty)?;
        let availability = match self.store.find_stock(key).await? {
            Some(stock) => Availability {
                available: stock.available() >= qty,
                quantity: stock.available(),
                is_low_stock: stock.is_low_stock(),
                is_out_of_stock: stock.is_out_of_stock(),
                reason: None,
            },
            None => Availability {
                available: false,
                quantity: 0,
                is_low_stock: false,
                is_out_of_stock: true,
                reason: Some("Not stocked at this location".to_string()),
            },
        };
        Ok(availability)
    }

    pub async fn reserve(&self, key: &StockKey, qty: i64) -> CommerceResult<StockRecord> {
        self.mutate(key, qty, StockOp::Reserve).await
    }

    pub async fn release(&self, key: &StockKey, qty: i64) -> CommerceResult<StockRecord> {
        self.mutate(key, qty, StockOp::Release).await
    }

    pub async fn fulfill(&self, key: &StockKey, qty: i64) -> CommerceResult<StockRecord> {
        self.mutate(key, qty, StockOp::Fulfill).await
    }

    pub async fn restock(&self, key: &StockKey, qty: i64) -> CommerceResult<StockRecord> {
        self.mutate(key, qty, StockOp::Restock).await
    }

    pub async fn reserve_all(&self, lines: &[StockLine]) -> BatchReport {
        self.batch(lines, StockOp::Reserve).await
    }

    pub async fn release_all(&self, lines: &[StockLine]) -> BatchReport {
        self.batch(lines, StockOp::Release).await
    }

    pub async fn fulfill_all(&self, lines: &[StockLine]) -> BatchReport {
        self.batch(lines, StockOp::Fulfill).await
    }

    pub async fn restock_all(&self, lines: &[StockLine]) -> BatchReport {
        self.batch(lines, StockOp::Restock).await
    }

    pub async fn low_stock(&self, location_id: Option<&str>) -> CommerceResult<Vec<StockRecord>> {
        let records = self.store.list_stock(location_id).await?;
        Ok(records.into_iter().filter(StockRecord::is_low_stock).collect())
    }

    pub async fn reorder_suggestions(
        &self,
        location_id: Option<&str>,
    ) -> CommerceResult<Vec<ReorderSuggestion>> {
        let records = self.store.list_stock(location_id).await?;
        Ok(records
            .into_iter()
            .filter(StockRecord::needs_reorder)
            .map(|stock| ReorderSuggestion {
                suggested_quantity: stock.reorder_quantity,
                stock,
            })
            .collect())
    }

    async fn batch(&self, lines: &[StockLine], op: StockOp) -> BatchReport {
        let mut results = Vec::with_capacity(lines.len());
        for line in lines {
            let result = self.mutate(&line.key(), line.quantity, op).await;
            if let Err(ref e) = result {
                tracing::warn!(
                    op = op.name(),
                    stock = %line.key(),
                    quantity = line.quantity,
                    error = %e,
                    "Batch line failed"
                );
            }
            results.push((line.clone(), result));
        }
        BatchReport { results }
    }

    async fn mutate(&self, key: &StockKey, qty: i64, op: StockOp) -> CommerceResult<StockRecord> {
        positive(qty)?;
        self.write(key, op.name(), |current| op.apply(current, qty)).await
    }

    async fn write<F>(&self, key: &StockKey, op: &'static str, apply: F) -> CommerceResult<StockRecord>
    where
        F: Fn(&StockRecord) -> CommerceResult<StockRecord>,
    {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let current = self.get(key).await?;
            let next = apply(&current)?;

            if self.store.swap_stock(current.version, &next).await? {
                tracing::info!(
                    op,
                    stock = %key,
                    on_hand = next.on_hand,
                    reserved = next.reserved,
                    available = next.available(),
                    "Stock updated"
                );
                if next.is_low_stock() && !current.is_low_stock() {
                    self.notifier.dispatch(CommerceEvent::low_stock(&next));
                }
                return Ok(next);
            }

            tracing::debug!(op, stock = %key, attempt, "Stock version moved, retrying");
            tokio::task::yield_now().await;
        }

        Err(CommerceError::ConcurrentUpdate)
    }
}
