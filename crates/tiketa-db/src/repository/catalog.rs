//! # Catalog Repository
//!
//! Reference data reads and writes: events, ticket types, shop items,
//! merchants, pickup locations and the user directory. None of this is on
//! the transactional hot path - the purchase transactions read the rows
//! they need themselves - but seeding, listings and the identity lookup
//! live here.

use sqlx::SqlitePool;

use tiketa_core::{
    Event, Merchant, PickupLocation, ShopItem, TicketType, User,
};

use crate::error::DbResult;

/// Repository for reference data.
#[derive(Debug, Clone)]
pub struct CatalogRepository {
    pool: SqlitePool,
}

impl CatalogRepository {
    /// Creates a new CatalogRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CatalogRepository { pool }
    }

    // -------------------------------------------------------------------------
    // Users (identity lookup consumed by confirmations and redemption)
    // -------------------------------------------------------------------------

    /// Resolves a buyer. Identity is issued upstream; this is the local
    /// profile lookup.
    pub async fn get_user(&self, id: &str) -> DbResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, name, phone, email, created_at FROM users WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    pub async fn insert_user(&self, user: &User) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO users (id, name, phone, email, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&user.id)
        .bind(&user.name)
        .bind(&user.phone)
        .bind(&user.email)
        .bind(user.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Events & Ticket Types
    // -------------------------------------------------------------------------

    pub async fn get_event(&self, id: &str) -> DbResult<Option<Event>> {
        let event = sqlx::query_as::<_, Event>(
            "SELECT id, title, venue, starts_at, status, created_at, updated_at FROM events WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(event)
    }

    pub async fn insert_event(&self, event: &Event) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO events (id, title, venue, starts_at, status, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&event.id)
        .bind(&event.title)
        .bind(&event.venue)
        .bind(event.starts_at)
        .bind(event.status)
        .bind(event.created_at)
        .bind(event.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_ticket_type(&self, id: &str) -> DbResult<Option<TicketType>> {
        let tt = sqlx::query_as::<_, TicketType>(
            r#"
            SELECT id, event_id, name, price_cents, quantity, sold, max_per_order, is_active
            FROM ticket_types
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(tt)
    }

    /// Ticket types of one event, actives first.
    pub async fn ticket_types_for_event(&self, event_id: &str) -> DbResult<Vec<TicketType>> {
        let types = sqlx::query_as::<_, TicketType>(
            r#"
            SELECT id, event_id, name, price_cents, quantity, sold, max_per_order, is_active
            FROM ticket_types
            WHERE event_id = ?1
            ORDER BY is_active DESC, price_cents
            "#,
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(types)
    }

    pub async fn insert_ticket_type(&self, tt: &TicketType) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO ticket_types (id, event_id, name, price_cents, quantity, sold, max_per_order, is_active)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&tt.id)
        .bind(&tt.event_id)
        .bind(&tt.name)
        .bind(tt.price_cents)
        .bind(tt.quantity)
        .bind(tt.sold)
        .bind(tt.max_per_order)
        .bind(tt.is_active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Shop
    // -------------------------------------------------------------------------

    pub async fn get_shop_item(&self, id: &str) -> DbResult<Option<ShopItem>> {
        let item = sqlx::query_as::<_, ShopItem>(&select_shop_items("WHERE si.id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(item)
    }

    /// Purchasable shop items: in stock, and the owning merchant (when
    /// there is one) is active.
    pub async fn list_purchasable_items(&self) -> DbResult<Vec<ShopItem>> {
        let items = sqlx::query_as::<_, ShopItem>(&select_shop_items(
            r#"
            WHERE si.in_stock = 1
              AND (si.merchant_id IS NULL
                   OR EXISTS (SELECT 1 FROM merchants m
                              WHERE m.id = si.merchant_id AND m.status = 'ACTIVE'))
            ORDER BY si.name
            "#,
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    pub async fn insert_shop_item(&self, item: &ShopItem) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO shop_items (id, merchant_id, name, description, price_cents, in_stock, stock_quantity, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&item.id)
        .bind(&item.merchant_id)
        .bind(&item.name)
        .bind(&item.description)
        .bind(item.price_cents)
        .bind(item.in_stock)
        .bind(item.stock_quantity)
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_merchant(&self, merchant: &Merchant) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO merchants (id, business_name, trade_name, status, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&merchant.id)
        .bind(&merchant.business_name)
        .bind(&merchant.trade_name)
        .bind(merchant.status)
        .bind(merchant.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_pickup_locations(&self) -> DbResult<Vec<PickupLocation>> {
        let locations = sqlx::query_as::<_, PickupLocation>(
            "SELECT id, name, area, is_active FROM pickup_locations WHERE is_active = 1 ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(locations)
    }

    pub async fn insert_pickup_location(&self, location: &PickupLocation) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO pickup_locations (id, name, area, is_active) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&location.id)
        .bind(&location.name)
        .bind(&location.area)
        .bind(location.is_active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn select_shop_items(clause: &str) -> String {
    format!(
        r#"
        SELECT si.id, si.merchant_id, si.name, si.description, si.price_cents,
               si.in_stock, si.stock_quantity, si.created_at, si.updated_at
        FROM shop_items si
        {clause}
        "#
    )
}
