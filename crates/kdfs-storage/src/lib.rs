//! PostgreSQL persistence for KDFS: DDL, watermark reads, natural-key
//! existence checks, and atomic batch inserts.

use std::collections::HashSet;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use kdfs_core::{default_watermark, DisasterMessage, NewsArticle, SourceKind, NO_LINK_AVAILABLE};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "kdfs-storage";

const CREATE_NEWS_ARTICLES: &str = r#"
CREATE TABLE IF NOT EXISTS news_articles (
    id          BIGSERIAL PRIMARY KEY,
    yna_no      BIGINT NOT NULL UNIQUE,
    crt_dt      TEXT NOT NULL DEFAULT '',
    yna_wrtr_nm TEXT NOT NULL DEFAULT '',
    yna_cn      TEXT NOT NULL DEFAULT '',
    yna_ymd     TEXT NOT NULL,
    yna_ttl     TEXT NOT NULL DEFAULT '',
    news_link   TEXT NOT NULL
)
"#;

const CREATE_DISASTER_MESSAGES: &str = r#"
CREATE TABLE IF NOT EXISTS disaster_messages (
    id           BIGSERIAL PRIMARY KEY,
    sn           BIGINT NOT NULL UNIQUE,
    msg_cn       TEXT NOT NULL DEFAULT '',
    rcptn_rgn_nm TEXT NOT NULL DEFAULT '',
    crt_dt       TEXT NOT NULL DEFAULT '',
    reg_ymd      TEXT NOT NULL,
    emrg_step_nm TEXT NOT NULL DEFAULT '',
    dst_se_nm    TEXT NOT NULL DEFAULT '',
    mdfcn_ymd    TEXT NOT NULL DEFAULT ''
)
"#;

/// Handle over the connection pool. One logical writer; the `UNIQUE`
/// constraints on `yna_no`/`sn` are the backstop against duplicate rows.
#[derive(Debug, Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    /// Connect to the database. Failure here is fatal to the process; no
    /// sync cycle runs without a store.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect(database_url)
            .await
            .context("connecting to database")?;
        info!("connected to database");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create-if-absent DDL for both feed tables. Also upgrades pre-link
    /// `news_articles` deployments in place.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(CREATE_NEWS_ARTICLES)
            .execute(&self.pool)
            .await
            .context("creating news_articles")?;
        let add_link = format!(
            "ALTER TABLE news_articles ADD COLUMN IF NOT EXISTS news_link TEXT NOT NULL DEFAULT '{NO_LINK_AVAILABLE}'"
        );
        sqlx::query(&add_link)
            .execute(&self.pool)
            .await
            .context("adding news_link column")?;
        sqlx::query(CREATE_DISASTER_MESSAGES)
            .execute(&self.pool)
            .await
            .context("creating disaster_messages")?;
        info!("schema ready");
        Ok(())
    }

    /// Highest stored watermark value for a source, or the fixed default if
    /// the table is empty or the query/parse fails. Never errors: the sync
    /// must always have a valid lower bound.
    pub async fn watermark(&self, source: SourceKind) -> NaiveDateTime {
        let sql = watermark_sql(source);
        let max: Option<String> = match sqlx::query_scalar(&sql).fetch_one(&self.pool).await {
            Ok(value) => value,
            Err(err) => {
                warn!(%source, error = %err, "watermark query failed, using default");
                return default_watermark();
            }
        };
        match max {
            Some(raw) => match source.parse_watermark(&raw) {
                Ok(ts) => ts,
                Err(err) => {
                    warn!(%source, raw, error = %err, "stored watermark unparseable, using default");
                    default_watermark()
                }
            },
            None => default_watermark(),
        }
    }

    /// Which of the given news natural keys already have a stored row.
    pub async fn existing_news_keys(&self, keys: &[i64]) -> Result<HashSet<i64>> {
        if keys.is_empty() {
            return Ok(HashSet::new());
        }
        let rows: Vec<i64> =
            sqlx::query_scalar("SELECT yna_no FROM news_articles WHERE yna_no = ANY($1)")
                .bind(keys)
                .fetch_all(&self.pool)
                .await
                .context("checking existing news keys")?;
        Ok(rows.into_iter().collect())
    }

    /// Which of the given message natural keys already have a stored row.
    pub async fn existing_message_keys(&self, keys: &[i64]) -> Result<HashSet<i64>> {
        if keys.is_empty() {
            return Ok(HashSet::new());
        }
        let rows: Vec<i64> =
            sqlx::query_scalar("SELECT sn FROM disaster_messages WHERE sn = ANY($1)")
                .bind(keys)
                .fetch_all(&self.pool)
                .await
                .context("checking existing message keys")?;
        Ok(rows.into_iter().collect())
    }

    /// Insert a page of news articles in one transaction. Any single failed
    /// insert rolls back the whole page.
    pub async fn insert_articles(&self, rows: &[NewsArticle]) -> Result<u64> {
        let mut tx = self.pool.begin().await.context("beginning news batch")?;
        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO news_articles
                    (yna_no, crt_dt, yna_wrtr_nm, yna_cn, yna_ymd, yna_ttl, news_link)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(row.yna_no)
            .bind(&row.crt_dt)
            .bind(&row.yna_wrtr_nm)
            .bind(&row.yna_cn)
            .bind(&row.yna_ymd)
            .bind(&row.yna_ttl)
            .bind(&row.news_link)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("inserting news article yna_no={}", row.yna_no))?;
        }
        tx.commit().await.context("committing news batch")?;
        Ok(rows.len() as u64)
    }

    /// Insert a page of disaster messages in one transaction. Any single
    /// failed insert rolls back the whole page.
    pub async fn insert_messages(&self, rows: &[DisasterMessage]) -> Result<u64> {
        let mut tx = self.pool.begin().await.context("beginning message batch")?;
        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO disaster_messages
                    (sn, msg_cn, rcptn_rgn_nm, crt_dt, reg_ymd, emrg_step_nm, dst_se_nm, mdfcn_ymd)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(row.sn)
            .bind(&row.msg_cn)
            .bind(&row.rcptn_rgn_nm)
            .bind(&row.crt_dt)
            .bind(&row.reg_ymd)
            .bind(&row.emrg_step_nm)
            .bind(&row.dst_se_nm)
            .bind(&row.mdfcn_ymd)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("inserting disaster message sn={}", row.sn))?;
        }
        tx.commit().await.context("committing message batch")?;
        Ok(rows.len() as u64)
    }
}

fn watermark_sql(source: SourceKind) -> String {
    format!(
        "SELECT MAX({}) FROM {}",
        source.watermark_column(),
        source.table()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watermark_sql_targets_the_source_date_field() {
        assert_eq!(
            watermark_sql(SourceKind::News),
            "SELECT MAX(yna_ymd) FROM news_articles"
        );
        assert_eq!(
            watermark_sql(SourceKind::Messages),
            "SELECT MAX(reg_ymd) FROM disaster_messages"
        );
    }

    #[test]
    fn ddl_enforces_at_most_one_row_per_natural_key() {
        assert!(CREATE_NEWS_ARTICLES.contains("yna_no      BIGINT NOT NULL UNIQUE"));
        assert!(CREATE_DISASTER_MESSAGES.contains("sn           BIGINT NOT NULL UNIQUE"));
    }

    #[test]
    fn news_link_column_never_admits_null() {
        assert!(CREATE_NEWS_ARTICLES.contains("news_link   TEXT NOT NULL"));
    }
}
