use async_trait::async_trait;
use chrono::{DateTime, Utc};
use loppis_core::{Address, Parcel, ShipmentStatus};
use loppis_order::models::{Cancellation, Refund};
use loppis_order::{
    BookingGuard, FulfillmentRepository, NewShipment, Order, OrderStatus, RepoError, RepoResult,
    Shipment, ShippingDetails, TrackingEvent, TrackingUpdate, TrackingWrite,
};
use sqlx::pool::PoolConnection;
use sqlx::types::Json;
use sqlx::{Connection, PgConnection, PgPool, Postgres};
use std::collections::HashMap;
use tracing::{debug, warn};
use uuid::Uuid;

/// Maps driver errors onto the repository taxonomy. Only transient failures
/// come out as `Unavailable`.
pub(crate) fn db_error(err: sqlx::Error) -> RepoError {
    match &err {
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some("23505") => RepoError::Conflict(db.message().to_string()),
            Some("23503") => RepoError::NotFound(db.message().to_string()),
            // serialization failure, deadlock
            Some("40001") | Some("40P01") => RepoError::Unavailable(db.message().to_string()),
            _ => RepoError::Storage(err.to_string()),
        },
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            RepoError::Unavailable(err.to_string())
        }
        _ => RepoError::Storage(err.to_string()),
    }
}

fn corrupt(what: &str, err: impl std::fmt::Display) -> RepoError {
    RepoError::Storage(format!("invalid {} in storage: {}", what, err))
}

pub struct PgFulfillmentRepository {
    pool: PgPool,
}

impl PgFulfillmentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: String,
    buyer_id: String,
    seller_ids: Vec<String>,
    total_cents: i64,
    currency: String,
    status: String,
    shipping_name: Option<String>,
    shipping_street: Option<String>,
    shipping_city: Option<String>,
    shipping_postal_code: Option<String>,
    shipping_country_code: Option<String>,
    shipping_phone: Option<String>,
    shipping_email: Option<String>,
    cancellation_reason: Option<String>,
    cancelled_at: Option<DateTime<Utc>>,
    refund_amount_cents: Option<i64>,
    refund_reason: Option<String>,
    refunded_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = RepoError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let status: OrderStatus = row.status.parse().map_err(|e| corrupt("order status", e))?;
        let cancellation = row.cancelled_at.map(|cancelled_at| Cancellation {
            reason: row.cancellation_reason,
            cancelled_at,
        });
        let refund = match (row.refund_amount_cents, row.refunded_at) {
            (Some(amount_cents), Some(refunded_at)) => Some(Refund {
                amount_cents,
                reason: row.refund_reason,
                refunded_at,
            }),
            _ => None,
        };

        Ok(Order {
            id: row.id,
            buyer_id: row.buyer_id,
            seller_ids: row.seller_ids,
            total_cents: row.total_cents,
            currency: row.currency,
            status,
            shipping: ShippingDetails {
                name: row.shipping_name,
                street: row.shipping_street,
                city: row.shipping_city,
                postal_code: row.shipping_postal_code,
                country_code: row.shipping_country_code,
                phone: row.shipping_phone.map(Into::into),
                email: row.shipping_email.map(Into::into),
            },
            cancellation,
            refund,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ShipmentRow {
    id: String,
    order_id: String,
    carrier: String,
    tracking_number: String,
    carrier_shipment_id: String,
    service_code: String,
    status: String,
    sender: Json<Address>,
    recipient: Json<Address>,
    parcel: Json<Parcel>,
    label_url: Option<String>,
    estimated_delivery: Option<DateTime<Utc>>,
    actual_delivery: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ShipmentRow {
    fn into_shipment(self, events: Vec<TrackingEvent>) -> RepoResult<Shipment> {
        let status: ShipmentStatus = self.status.parse().map_err(|e| corrupt("shipment status", e))?;
        Ok(Shipment {
            id: self.id,
            order_id: self.order_id,
            carrier: self.carrier,
            tracking_number: self.tracking_number,
            carrier_shipment_id: self.carrier_shipment_id,
            service_code: self.service_code,
            status,
            sender: self.sender.0,
            recipient: self.recipient.0,
            parcel: self.parcel.0,
            label_url: self.label_url,
            estimated_delivery: self.estimated_delivery,
            actual_delivery: self.actual_delivery,
            created_at: self.created_at,
            updated_at: self.updated_at,
            events,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TrackingEventRow {
    id: String,
    shipment_id: String,
    status_code: String,
    description: String,
    location: Option<String>,
    event_time: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl From<TrackingEventRow> for TrackingEvent {
    fn from(row: TrackingEventRow) -> Self {
        TrackingEvent {
            id: row.id,
            shipment_id: row.shipment_id,
            status_code: row.status_code,
            description: row.description,
            location: row.location,
            occurred_at: row.event_time,
            created_at: row.created_at,
        }
    }
}

const ORDER_COLUMNS: &str = r#"
    o.id, o.buyer_id,
    ARRAY(SELECT DISTINCT i.seller_id FROM order_items i WHERE i.order_id = o.id) AS seller_ids,
    o.total_cents, o.currency, o.status,
    o.shipping_name, o.shipping_street, o.shipping_city, o.shipping_postal_code,
    o.shipping_country_code, o.shipping_phone, o.shipping_email,
    o.cancellation_reason, o.cancelled_at,
    o.refund_amount_cents, o.refund_reason, o.refunded_at,
    o.created_at, o.updated_at
"#;

const SHIPMENT_COLUMNS: &str = r#"
    id, order_id, carrier, tracking_number, carrier_shipment_id, service_code, status,
    sender, recipient, parcel, label_url, estimated_delivery, actual_delivery,
    created_at, updated_at
"#;

/// Attaches events (oldest first) to the given shipment rows.
async fn with_events(conn: &mut PgConnection, rows: Vec<ShipmentRow>) -> RepoResult<Vec<Shipment>> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();

    let event_rows: Vec<TrackingEventRow> = sqlx::query_as(
        r#"
        SELECT id, shipment_id, status_code, description, location, event_time, created_at
        FROM tracking_events
        WHERE shipment_id = ANY($1)
        ORDER BY event_time ASC, created_at ASC
        "#,
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await
    .map_err(db_error)?;

    let mut events: HashMap<String, Vec<TrackingEvent>> = HashMap::new();
    for row in event_rows {
        events
            .entry(row.shipment_id.clone())
            .or_default()
            .push(row.into());
    }

    rows.into_iter()
        .map(|row| {
            let shipment_events = events.remove(&row.id).unwrap_or_default();
            row.into_shipment(shipment_events)
        })
        .collect()
}

async fn fetch_order(conn: &mut PgConnection, order_id: &str) -> RepoResult<Option<Order>> {
    let row: Option<OrderRow> =
        sqlx::query_as(&format!("SELECT {} FROM orders o WHERE o.id = $1", ORDER_COLUMNS))
            .bind(order_id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(db_error)?;

    row.map(Order::try_from).transpose()
}

async fn shipment_exists(conn: &mut PgConnection, order_id: &str) -> RepoResult<bool> {
    sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM shipments WHERE order_id = $1)")
        .bind(order_id)
        .fetch_one(&mut *conn)
        .await
        .map_err(db_error)
}

/// Shipment INSERT plus the PAID -> SHIPPED compare-and-set, in one transaction.
async fn insert_shipment(conn: &mut PgConnection, new: &NewShipment) -> RepoResult<Shipment> {
    let mut tx = conn.begin().await.map_err(db_error)?;

    let row: ShipmentRow = sqlx::query_as(&format!(
        r#"
        INSERT INTO shipments (id, order_id, carrier, tracking_number, carrier_shipment_id,
            service_code, status, sender, recipient, parcel, label_url, estimated_delivery)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        RETURNING {}
        "#,
        SHIPMENT_COLUMNS
    ))
    .bind(&new.id)
    .bind(&new.order_id)
    .bind(&new.carrier)
    .bind(&new.tracking_number)
    .bind(&new.carrier_shipment_id)
    .bind(&new.service_code)
    .bind(ShipmentStatus::Pending.as_str())
    .bind(Json(&new.sender))
    .bind(Json(&new.recipient))
    .bind(Json(&new.parcel))
    .bind(&new.label_url)
    .bind(new.estimated_delivery)
    .fetch_one(&mut *tx)
    .await
    .map_err(db_error)?;

    let updated = sqlx::query(
        "UPDATE orders SET status = $1, updated_at = NOW() WHERE id = $2 AND status = $3",
    )
    .bind(OrderStatus::Shipped.as_str())
    .bind(&new.order_id)
    .bind(OrderStatus::Paid.as_str())
    .execute(&mut *tx)
    .await
    .map_err(db_error)?;

    if updated.rows_affected() == 0 {
        tx.rollback().await.map_err(db_error)?;
        return Err(RepoError::Conflict(format!(
            "order {} is no longer PAID",
            new.order_id
        )));
    }

    tx.commit().await.map_err(db_error)?;
    row.into_shipment(Vec::new())
}

/// Session-level `pg_advisory_lock` on one checked-out connection. Everything
/// the booking reads or writes under the lock runs on that same connection.
struct PgBookingGuard {
    order_id: String,
    conn: Option<PoolConnection<Postgres>>,
}

impl PgBookingGuard {
    fn conn(&mut self) -> RepoResult<&mut PgConnection> {
        self.conn
            .as_deref_mut()
            .ok_or_else(|| RepoError::Storage("booking lock already released".to_string()))
    }
}

impl Drop for PgBookingGuard {
    fn drop(&mut self) {
        // A session lock survives the return to the pool; closing the
        // connection is what ends it.
        if let Some(conn) = self.conn.take() {
            warn!("Booking lock for order {} dropped without release, closing its connection", self.order_id);
            drop(conn.detach());
        }
    }
}

#[async_trait]
impl BookingGuard for PgBookingGuard {
    async fn get_order(&mut self, order_id: &str) -> RepoResult<Option<Order>> {
        fetch_order(self.conn()?, order_id).await
    }

    async fn has_shipment(&mut self, order_id: &str) -> RepoResult<bool> {
        shipment_exists(self.conn()?, order_id).await
    }

    async fn record_shipment(&mut self, shipment: &NewShipment) -> RepoResult<Shipment> {
        insert_shipment(self.conn()?, shipment).await
    }

    async fn release(self: Box<Self>) -> RepoResult<()> {
        let mut guard = self;
        let Some(mut conn) = guard.conn.take() else {
            return Ok(());
        };
        let unlocked = sqlx::query("SELECT pg_advisory_unlock(hashtext('shipment:' || $1)::bigint)")
            .bind(&guard.order_id)
            .execute(&mut *conn)
            .await;
        if let Err(e) = unlocked {
            drop(conn.detach());
            return Err(db_error(e));
        }
        debug!("Advisory booking lock released for order {}", guard.order_id);
        Ok(())
    }
}

#[async_trait]
impl FulfillmentRepository for PgFulfillmentRepository {
    async fn get_order(&self, order_id: &str) -> RepoResult<Option<Order>> {
        let mut conn = self.pool.acquire().await.map_err(db_error)?;
        fetch_order(&mut conn, order_id).await
    }

    async fn list_shipments(&self, order_id: &str) -> RepoResult<Vec<Shipment>> {
        let mut conn = self.pool.acquire().await.map_err(db_error)?;
        let rows: Vec<ShipmentRow> = sqlx::query_as(&format!(
            "SELECT {} FROM shipments WHERE order_id = $1 ORDER BY created_at ASC",
            SHIPMENT_COLUMNS
        ))
        .bind(order_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(db_error)?;

        with_events(&mut conn, rows).await
    }

    async fn get_shipment(&self, shipment_id: &str) -> RepoResult<Option<Shipment>> {
        let mut conn = self.pool.acquire().await.map_err(db_error)?;
        let row: Option<ShipmentRow> = sqlx::query_as(&format!(
            "SELECT {} FROM shipments WHERE id = $1",
            SHIPMENT_COLUMNS
        ))
        .bind(shipment_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_error)?;

        match row {
            Some(row) => Ok(with_events(&mut conn, vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn lock_for_booking(&self, order_id: &str) -> RepoResult<Box<dyn BookingGuard>> {
        let conn = self.pool.acquire().await.map_err(db_error)?;
        // Built before locking so a cancelled wait still closes the connection
        let mut guard = PgBookingGuard {
            order_id: order_id.to_string(),
            conn: Some(conn),
        };
        sqlx::query("SELECT pg_advisory_lock(hashtext('shipment:' || $1)::bigint)")
            .bind(order_id)
            .execute(guard.conn()?)
            .await
            .map_err(db_error)?;
        debug!("Advisory booking lock held for order {}", order_id);
        Ok(Box::new(guard))
    }

    async fn record_shipment(&self, new: &NewShipment) -> RepoResult<Shipment> {
        let mut conn = self.pool.acquire().await.map_err(db_error)?;
        insert_shipment(&mut conn, new).await
    }

    async fn apply_tracking(&self, update: &TrackingUpdate) -> RepoResult<TrackingWrite> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let mut write = TrackingWrite::default();

        for event in &update.events {
            let result = sqlx::query(
                r#"
                INSERT INTO tracking_events (id, shipment_id, status_code, description, location, event_time)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (shipment_id, event_time, status_code) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&update.shipment_id)
            .bind(&event.status_code)
            .bind(&event.description)
            .bind(&event.location)
            .bind(event.occurred_at)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
            write.events_inserted += result.rows_affected() as usize;
        }

        if let Some(change) = update.status {
            let result = sqlx::query(
                "UPDATE shipments SET status = $1, updated_at = NOW() WHERE id = $2 AND status = $3",
            )
            .bind(change.to.as_str())
            .bind(&update.shipment_id)
            .bind(change.from.as_str())
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
            write.status_updated = result.rows_affected() == 1;
        }

        if let Some(delivered_at) = update.actual_delivery {
            sqlx::query(
                "UPDATE shipments SET actual_delivery = $1, updated_at = NOW() WHERE id = $2 AND actual_delivery IS NULL",
            )
            .bind(delivered_at)
            .bind(&update.shipment_id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        }

        if update.deliver_order {
            let result = sqlx::query(
                r#"
                UPDATE orders SET status = $1, updated_at = NOW()
                WHERE id = $2 AND status = $3
                  AND EXISTS (SELECT 1 FROM shipments s WHERE s.id = $4 AND s.status = $5)
                "#,
            )
            .bind(OrderStatus::Delivered.as_str())
            .bind(&update.order_id)
            .bind(OrderStatus::Shipped.as_str())
            .bind(&update.shipment_id)
            .bind(ShipmentStatus::Delivered.as_str())
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
            write.order_delivered = result.rows_affected() == 1;
        }

        tx.commit().await.map_err(db_error)?;
        Ok(write)
    }

    async fn update_order_status(
        &self,
        order_id: &str,
        from: OrderStatus,
        to: OrderStatus,
    ) -> RepoResult<bool> {
        let result = sqlx::query(
            "UPDATE orders SET status = $1, updated_at = NOW() WHERE id = $2 AND status = $3",
        )
        .bind(to.as_str())
        .bind(order_id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM orders WHERE id = $1)")
            .bind(order_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;
        if exists {
            Ok(false)
        } else {
            Err(RepoError::NotFound(format!("order {}", order_id)))
        }
    }
}
