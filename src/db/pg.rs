//! Postgres-backed pools (sqlx).

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use futures::TryStreamExt;
use serde_json::{Map, Value};
use sqlx::postgres::{
    PgArguments, PgConnectOptions, PgPoolOptions, PgRow, PgValueFormat, PgValueRef,
};
use sqlx::query::Query;
use sqlx::types::{BigDecimal, Json};
use sqlx::{Column, Either, Executor, PgConnection, PgPool, Postgres, Row, TypeInfo, ValueRef};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::db::models::{RowSet, SqlParam, Statement};
use crate::db::schema::{RESET_AUDIT_IDENTITY, SET_AUDIT_IDENTITY};
use crate::db::traits::{PoolConnector, TenantPool};
use crate::error::{AgencyDbError, classify_sqlx};
use crate::tenant::{ActingUser, TenantId};

const APPLICATION_NAME: &str = "agencydb";

/// Creates one sqlx pool per tenant from shared [`DatabaseConfig`].
pub struct PgConnector {
    cfg: DatabaseConfig,
}

impl PgConnector {
    pub fn new(cfg: DatabaseConfig) -> Self {
        Self { cfg }
    }

    fn connect_options(&self, tenant: &TenantId) -> Result<PgConnectOptions, AgencyDbError> {
        let url = self.cfg.connection_url(tenant)?;
        let statement_timeout_ms = self.cfg.statement_timeout().as_millis().to_string();
        let opts = PgConnectOptions::from_str(url.as_str())
            .map_err(|e| AgencyDbError::ConnectionSettings(format!("tenant {tenant}: {e}")))?
            .application_name(APPLICATION_NAME)
            .options([("statement_timeout", statement_timeout_ms)]);
        Ok(opts)
    }
}

#[async_trait]
impl PoolConnector for PgConnector {
    type Pool = PgTenantPool;

    async fn connect(&self, tenant: &TenantId) -> Result<PgTenantPool, AgencyDbError> {
        let opts = self.connect_options(tenant)?;
        let audit_setting: Arc<str> = Arc::from(self.cfg.audit_setting.as_str());
        let reset_setting = audit_setting.clone();

        let pool = PgPoolOptions::new()
            .max_connections(self.cfg.max_connections)
            .acquire_timeout(self.cfg.acquire_timeout())
            .after_release(move |conn, _meta| {
                let setting = reset_setting.clone();
                Box::pin(async move {
                    // Transaction-local settings are already gone; this also covers
                    // anything a caller set at session level.
                    sqlx::query(RESET_AUDIT_IDENTITY)
                        .bind(setting.as_ref())
                        .execute(&mut *conn)
                        .await?;
                    Ok(true)
                })
            })
            .connect_with(opts)
            .await
            .map_err(|e| classify_sqlx(tenant, e))?;

        info!(
            tenant = %tenant,
            max_connections = self.cfg.max_connections,
            "tenant pool connected"
        );

        Ok(PgTenantPool {
            tenant: tenant.clone(),
            pool,
            audit_setting,
        })
    }
}

pub struct PgTenantPool {
    tenant: TenantId,
    pool: PgPool,
    audit_setting: Arc<str>,
}

impl PgTenantPool {
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn run_in_transaction(
        &self,
        statements: &[Statement],
        acting_user: Option<&ActingUser>,
    ) -> Result<Vec<RowSet>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let result = async {
            if let Some(user) = acting_user {
                sqlx::query(SET_AUDIT_IDENTITY)
                    .bind(self.audit_setting.as_ref())
                    .bind(user.as_str())
                    .execute(&mut *tx)
                    .await?;
            }
            let mut sets = Vec::with_capacity(statements.len());
            for stmt in statements {
                sets.push(run_statement(&mut *tx, stmt).await?);
            }
            Ok::<_, sqlx::Error>(sets)
        }
        .await;

        match result {
            Ok(sets) => {
                tx.commit().await?;
                Ok(sets)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(
                        tenant = %self.tenant,
                        error = %rollback_err,
                        "rollback failed; connection will be discarded"
                    );
                }
                Err(e)
            }
        }
    }
}

#[async_trait]
impl TenantPool for PgTenantPool {
    async fn run(
        &self,
        statements: &[Statement],
        acting_user: Option<&ActingUser>,
    ) -> Result<Vec<RowSet>, AgencyDbError> {
        let result = match (statements, acting_user) {
            ([single], None) => {
                async {
                    let mut conn = self.pool.acquire().await?;
                    let set = run_statement(&mut *conn, single).await?;
                    Ok::<_, sqlx::Error>(vec![set])
                }
                .await
            }
            _ => self.run_in_transaction(statements, acting_user).await,
        };
        result.map_err(|e| classify_sqlx(&self.tenant, e))
    }

    async fn close(&self) {
        self.pool.close().await;
        debug!(tenant = %self.tenant, "tenant pool closed");
    }

    fn size(&self) -> u32 {
        self.pool.size()
    }

    fn num_idle(&self) -> usize {
        self.pool.num_idle()
    }

    fn max_connections(&self) -> u32 {
        self.pool.options().get_max_connections()
    }
}

async fn run_statement(conn: &mut PgConnection, stmt: &Statement) -> Result<RowSet, sqlx::Error> {
    let query = stmt
        .params
        .iter()
        .fold(sqlx::query(&stmt.sql), bind_param);

    let mut set = RowSet::default();
    let mut stream = conn.fetch_many(query);
    while let Some(step) = stream.try_next().await? {
        match step {
            Either::Left(done) => set.rows_affected += done.rows_affected(),
            Either::Right(row) => {
                if set.columns.is_empty() {
                    set.columns = row.columns().iter().map(|c| c.name().to_string()).collect();
                }
                set.rows.push(decode_row(&row));
            }
        }
    }
    Ok(set)
}

fn bind_param<'q>(
    query: Query<'q, Postgres, PgArguments>,
    param: &SqlParam,
) -> Query<'q, Postgres, PgArguments> {
    match param {
        SqlParam::Null => query.bind(None::<String>),
        SqlParam::Bool(v) => query.bind(*v),
        SqlParam::Int(v) => query.bind(*v),
        SqlParam::Float(v) => query.bind(*v),
        SqlParam::Text(v) => query.bind(v.clone()),
        SqlParam::Json(v) => query.bind(Json(v.clone())),
        SqlParam::Uuid(v) => query.bind(*v),
        SqlParam::Timestamp(v) => query.bind(*v),
    }
}

fn decode_row(row: &PgRow) -> Map<String, Value> {
    row.columns()
        .iter()
        .map(|column| {
            let value = decode_column(row, column.ordinal(), column.type_info().name());
            (column.name().to_string(), value)
        })
        .collect()
}

fn decode_column(row: &PgRow, idx: usize, type_name: &str) -> Value {
    match row.try_get_raw(idx) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Ok(_) => {}
        Err(_) => return Value::Null,
    }

    let decoded: Result<Value, sqlx::Error> = match type_name {
        "BOOL" => row.try_get::<bool, _>(idx).map(Value::from),
        "INT2" => row.try_get::<i16, _>(idx).map(Value::from),
        "INT4" => row.try_get::<i32, _>(idx).map(Value::from),
        "INT8" => row.try_get::<i64, _>(idx).map(Value::from),
        "FLOAT4" => row.try_get::<f32, _>(idx).map(|v| Value::from(f64::from(v))),
        "FLOAT8" => row.try_get::<f64, _>(idx).map(Value::from),
        "NUMERIC" => decode_numeric(row, idx).map(Value::String),
        "UUID" => row
            .try_get::<Uuid, _>(idx)
            .map(|v| Value::String(v.to_string())),
        "TIMESTAMPTZ" => row
            .try_get::<DateTime<Utc>, _>(idx)
            .map(|v| Value::String(v.to_rfc3339())),
        "TIMESTAMP" => row
            .try_get::<NaiveDateTime, _>(idx)
            .map(|v| Value::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
        "DATE" => row
            .try_get::<NaiveDate, _>(idx)
            .map(|v| Value::String(v.to_string())),
        "JSON" | "JSONB" => row.try_get::<Value, _>(idx),
        _ => row.try_get::<String, _>(idx).map(Value::String),
    };

    decoded.unwrap_or_else(|e| {
        debug!(column = idx, type_name, error = %e, "column not decodable; returning null");
        Value::Null
    })
}

/// Renders NUMERIC at the column's display scale (`numeric(10,2)` 2.50 stays
/// "2.50"); the decoded value alone carries the wire's base-10000 scale.
fn decode_numeric(row: &PgRow, idx: usize) -> Result<String, sqlx::Error> {
    let raw = row.try_get_raw(idx)?;
    if raw.format() == PgValueFormat::Text {
        return raw
            .as_str()
            .map(str::to_string)
            .map_err(sqlx::Error::Decode);
    }
    let scale = numeric_display_scale(&raw);
    let value = row.try_get::<BigDecimal, _>(idx)?;
    Ok(match scale {
        Some(scale) => value.with_scale(scale).to_plain_string(),
        None => value.to_plain_string(),
    })
}

/// Binary NUMERIC header: ndigits, weight, sign, dscale (all 16-bit).
fn numeric_display_scale(raw: &PgValueRef<'_>) -> Option<i64> {
    let bytes = raw.as_bytes().ok()?;
    dscale_from_header(bytes)
}

fn dscale_from_header(bytes: &[u8]) -> Option<i64> {
    let dscale = bytes.get(6..8)?;
    Some(i64::from(u16::from_be_bytes([dscale[0], dscale[1]])))
}
