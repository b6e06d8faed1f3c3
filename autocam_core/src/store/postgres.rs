use crate::config::PostgresConfig;
use crate::models::{
    Category, CategoryId, NewPart, Part, PartId, RetainedTickets, Thickness, Ticket,
    UpsertOutcome,
};
use crate::reconcile::traits::RelationalStore;
use crate::{Error, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};

const MIGRATION_0001: &str = include_str!("../../migrations/0001_init.sql");

const CATEGORY_COLUMNS: &str = "id, material, thickness";
const PART_COLUMNS: &str = "id, name, epic, ticket, quantity, category_id";

#[derive(Clone)]
pub struct PostgresRelationalStore {
    pool: PgPool,
}

impl PostgresRelationalStore {
    #[tracing::instrument(level = "debug", skip(cfg), fields(host = %cfg.host, db = %cfg.database))]
    pub async fn connect(cfg: &PostgresConfig) -> Result<Self> {
        let options = PgConnectOptions::new()
            .host(&cfg.host)
            .port(cfg.port)
            .database(&cfg.database)
            .username(&cfg.user)
            .password(&cfg.password);
        Self::connect_with(options, cfg).await
    }

    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn connect_with(options: PgConnectOptions, cfg: &PostgresConfig) -> Result<Self> {
        cfg.validate()?;
        let pool = PgPoolOptions::new()
            .max_connections(cfg.max_connections)
            .acquire_timeout(cfg.acquire_timeout)
            .connect_with(options)
            .await
            .map_err(|e| Error::backend("connect postgres", e))?;
        Ok(Self { pool })
    }

    /// Create `part_categories` and `parts` if they do not exist.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(MIGRATION_0001)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::backend("apply migrations", e))?;
        Ok(())
    }

    fn category_from_row(row: &PgRow) -> Result<Category> {
        let raw_thickness: f64 = row
            .try_get("thickness")
            .map_err(|e| Error::backend("thickness", e))?;
        Ok(Category {
            id: CategoryId(row.try_get("id").map_err(|e| Error::backend("id", e))?),
            material: row
                .try_get("material")
                .map_err(|e| Error::backend("material", e))?,
            thickness: Thickness::new(raw_thickness).ok_or_else(|| {
                Error::BackendMessage(format!("stored thickness is invalid: {raw_thickness}"))
            })?,
        })
    }

    fn part_from_row(row: &PgRow) -> Result<Part> {
        Ok(Part {
            id: PartId(row.try_get("id").map_err(|e| Error::backend("id", e))?),
            name: row.try_get("name").map_err(|e| Error::backend("name", e))?,
            epic: row.try_get("epic").map_err(|e| Error::backend("epic", e))?,
            ticket: Ticket(
                row.try_get("ticket")
                    .map_err(|e| Error::backend("ticket", e))?,
            ),
            quantity: row
                .try_get("quantity")
                .map_err(|e| Error::backend("quantity", e))?,
            category_id: CategoryId(
                row.try_get("category_id")
                    .map_err(|e| Error::backend("category_id", e))?,
            ),
        })
    }
}

#[async_trait]
impl RelationalStore for PostgresRelationalStore {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn find_category(
        &self,
        material: &str,
        thickness: Thickness,
    ) -> Result<Option<Category>> {
        let row = sqlx::query(&format!(
            "SELECT {CATEGORY_COLUMNS} FROM part_categories WHERE material = $1 AND thickness = $2"
        ))
        .bind(material)
        .bind(thickness.value())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::backend("find category", e))?;
        row.as_ref().map(Self::category_from_row).transpose()
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn insert_category(
        &self,
        material: &str,
        thickness: Thickness,
    ) -> Result<UpsertOutcome<Category>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::backend("begin category insert", e))?;

        let inserted = sqlx::query(&format!(
            "INSERT INTO part_categories (material, thickness) VALUES ($1, $2) \
             ON CONFLICT (material, thickness) DO NOTHING RETURNING {CATEGORY_COLUMNS}"
        ))
        .bind(material)
        .bind(thickness.value())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| Error::backend("insert category", e))?;

        let outcome = match inserted {
            Some(row) => UpsertOutcome::Created(Self::category_from_row(&row)?),
            None => {
                let row = sqlx::query(&format!(
                    "SELECT {CATEGORY_COLUMNS} FROM part_categories \
                     WHERE material = $1 AND thickness = $2"
                ))
                .bind(material)
                .bind(thickness.value())
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| Error::backend("select conflicting category", e))?;
                UpsertOutcome::AlreadyExists(Self::category_from_row(&row)?)
            }
        };

        tx.commit()
            .await
            .map_err(|e| Error::backend("commit category insert", e))?;
        Ok(outcome)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn find_part_by_name(&self, name: &str) -> Result<Option<Part>> {
        let row = sqlx::query(&format!("SELECT {PART_COLUMNS} FROM parts WHERE name = $1"))
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::backend("find part", e))?;
        row.as_ref().map(Self::part_from_row).transpose()
    }

    #[tracing::instrument(level = "debug", skip(self, part), fields(part_name = %part.name, ticket = %part.ticket))]
    async fn insert_part(&self, part: &NewPart) -> Result<UpsertOutcome<Part>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::backend("begin part insert", e))?;

        let inserted = sqlx::query(&format!(
            "INSERT INTO parts (name, epic, ticket, quantity, category_id) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (name) DO NOTHING RETURNING {PART_COLUMNS}"
        ))
        .bind(&part.name)
        .bind(&part.epic)
        .bind(part.ticket.as_str())
        .bind(part.quantity)
        .bind(part.category_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| Error::backend("insert part", e))?;

        let outcome = match inserted {
            Some(row) => UpsertOutcome::Created(Self::part_from_row(&row)?),
            None => {
                let row = sqlx::query(&format!("SELECT {PART_COLUMNS} FROM parts WHERE name = $1"))
                    .bind(&part.name)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(|e| Error::backend("select conflicting part", e))?;
                UpsertOutcome::AlreadyExists(Self::part_from_row(&row)?)
            }
        };

        tx.commit()
            .await
            .map_err(|e| Error::backend("commit part insert", e))?;
        Ok(outcome)
    }

    #[tracing::instrument(level = "debug", skip_all, fields(retained = retained.len()))]
    async fn delete_parts_not_in(&self, retained: &RetainedTickets) -> Result<u64> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::backend("begin part cleanup", e))?;
        let res = sqlx::query("DELETE FROM parts WHERE NOT (ticket = ANY($1))")
            .bind(retained.to_strings())
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::backend("delete stale parts", e))?;
        tx.commit()
            .await
            .map_err(|e| Error::backend("commit part cleanup", e))?;
        Ok(res.rows_affected())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn delete_orphan_categories(&self) -> Result<u64> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::backend("begin category cleanup", e))?;
        let res = sqlx::query(
            "DELETE FROM part_categories c \
             WHERE NOT EXISTS (SELECT 1 FROM parts p WHERE p.category_id = c.id)",
        )
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::backend("delete orphan categories", e))?;
        tx.commit()
            .await
            .map_err(|e| Error::backend("commit category cleanup", e))?;
        Ok(res.rows_affected())
    }
}
