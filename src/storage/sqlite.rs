//! SQLite-backed durable store.
//!
//! One connection behind a mutex. Multi-statement writes run in a transaction
//! and check the request context again right before commit, so an expired
//! deadline rolls everything back.

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::collections::HashMap;
use std::path::Path;

use super::types::{
    AdUnitUpdate, CampaignUpdate, CreativeUpdate, LineItemUpdate, NewAdUnit, NewCampaign,
    NewCreative, NewLineItem, TargetingRuleInput,
};
use super::{AdStore, AdminStore};
use crate::context::RequestContext;
use crate::error::{EngineError, Result};
use crate::types::{
    now_ms, AdUnit, Campaign, Creative, Event, EventType, LineItem, Operator, Size, Status,
    TargetingRule, DEFAULT_PRIORITY, DEFAULT_WEIGHT,
};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS campaigns (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS line_items (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        campaign_id INTEGER NOT NULL REFERENCES campaigns(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        priority INTEGER NOT NULL,
        weight INTEGER NOT NULL,
        frequency_cap INTEGER NOT NULL,
        frequency_cap_period TEXT NOT NULL,
        sov_percentage INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS targeting_rules (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        line_item_id INTEGER NOT NULL REFERENCES line_items(id) ON DELETE CASCADE,
        position INTEGER NOT NULL,
        key TEXT NOT NULL,
        operator TEXT NOT NULL,
        vals TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS creatives (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        line_item_id INTEGER NOT NULL REFERENCES line_items(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        width INTEGER NOT NULL,
        height INTEGER NOT NULL,
        image_url TEXT NOT NULL,
        click_url TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS ad_units (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        code TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        description TEXT NOT NULL,
        platform TEXT NOT NULL,
        sizes TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS line_item_ad_units (
        line_item_id INTEGER NOT NULL REFERENCES line_items(id) ON DELETE CASCADE,
        ad_unit_id INTEGER NOT NULL REFERENCES ad_units(id) ON DELETE CASCADE,
        PRIMARY KEY (line_item_id, ad_unit_id)
    );
    CREATE TABLE IF NOT EXISTS events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        event_type TEXT NOT NULL,
        impression_id TEXT NOT NULL,
        line_item_id INTEGER NOT NULL,
        creative_id INTEGER NOT NULL,
        user_id TEXT NOT NULL,
        country TEXT NOT NULL,
        platform TEXT NOT NULL,
        ad_unit TEXT NOT NULL,
        section TEXT NOT NULL,
        created_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_events_created_at ON events(created_at);
";

const LINE_ITEM_COLUMNS: &str = "li.id, li.campaign_id, li.name, li.priority, li.weight, \
     li.frequency_cap, li.frequency_cap_period, li.sov_percentage, li.status";

const CREATIVE_COLUMNS: &str =
    "id, line_item_id, name, width, height, image_url, click_url, status";

const AD_UNIT_COLUMNS: &str = "id, code, name, description, platform, sizes, status";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open or create a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| EngineError::Storage(format!("Failed to create directory: {}", e)))?;
            }
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Runs `f` in a transaction, re-checking the context before commit.
    fn write_tx<T>(
        &self,
        ctx: &RequestContext,
        f: impl FnOnce(&Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        ctx.check()?;
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        ctx.check()?;
        tx.commit()?;
        Ok(value)
    }
}

// ================================================================================================
// ROW MAPPING
// ================================================================================================

fn campaign_from_row(row: &Row<'_>) -> rusqlite::Result<Campaign> {
    Ok(Campaign {
        id: row.get(0)?,
        name: row.get(1)?,
        status: Status::from(row.get::<_, String>(2)?),
    })
}

/// Maps `LINE_ITEM_COLUMNS`; nested collections are left empty.
fn line_item_from_row(row: &Row<'_>) -> rusqlite::Result<LineItem> {
    Ok(LineItem {
        id: row.get(0)?,
        campaign_id: row.get(1)?,
        name: row.get(2)?,
        priority: row.get(3)?,
        weight: row.get(4)?,
        frequency_cap: row.get(5)?,
        frequency_cap_period: row.get(6)?,
        sov_percentage: row.get(7)?,
        status: Status::from(row.get::<_, String>(8)?),
        targeting_rules: Vec::new(),
        creatives: Vec::new(),
        ad_unit_ids: Vec::new(),
    })
}

fn creative_from_row(row: &Row<'_>) -> rusqlite::Result<Creative> {
    Ok(Creative {
        id: row.get(0)?,
        line_item_id: row.get(1)?,
        name: row.get(2)?,
        width: row.get(3)?,
        height: row.get(4)?,
        image_url: row.get(5)?,
        click_url: row.get(6)?,
        status: Status::from(row.get::<_, String>(7)?),
    })
}

fn json_column<T: serde::de::DeserializeOwned>(idx: usize, raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn rule_from_row(row: &Row<'_>) -> rusqlite::Result<TargetingRule> {
    let raw: String = row.get(4)?;
    Ok(TargetingRule {
        id: row.get(0)?,
        line_item_id: row.get(1)?,
        key: row.get(2)?,
        operator: Operator::from(row.get::<_, String>(3)?),
        values: json_column(4, &raw)?,
    })
}

fn ad_unit_from_row(row: &Row<'_>) -> rusqlite::Result<AdUnit> {
    let raw: String = row.get(5)?;
    Ok(AdUnit {
        id: row.get(0)?,
        code: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        platform: row.get(4)?,
        sizes: json_column::<Vec<Size>>(5, &raw)?,
        status: Status::from(row.get::<_, String>(6)?),
    })
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<Event> {
    let kind: String = row.get(0)?;
    let event_type = EventType::parse(&kind).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("unknown event type '{}'", kind).into(),
        )
    })?;
    Ok(Event {
        event_type,
        impression_id: row.get(1)?,
        line_item_id: row.get(2)?,
        creative_id: row.get(3)?,
        user_id: row.get(4)?,
        country: row.get(5)?,
        platform: row.get(6)?,
        ad_unit: row.get(7)?,
        section: row.get(8)?,
        created_at: row.get::<_, i64>(9)? as u64,
    })
}

/// Text field update: empty strings leave the stored value alone.
fn merge_text(target: &mut String, update: &Option<String>) {
    if let Some(value) = update.as_deref().filter(|v| !v.is_empty()) {
        *target = value.to_string();
    }
}

// ================================================================================================
// QUERY HELPERS (shared by reads inside and outside transactions)
// ================================================================================================

fn query_campaign(conn: &Connection, id: i64) -> Result<Option<Campaign>> {
    Ok(conn
        .query_row(
            "SELECT id, name, status FROM campaigns WHERE id = ?1",
            params![id],
            campaign_from_row,
        )
        .optional()?)
}

fn query_line_item(conn: &Connection, id: i64) -> Result<Option<LineItem>> {
    let sql = format!("SELECT {} FROM line_items li WHERE li.id = ?1", LINE_ITEM_COLUMNS);
    Ok(conn.query_row(&sql, params![id], line_item_from_row).optional()?)
}

fn query_rules(conn: &Connection, line_item_id: i64) -> Result<Vec<TargetingRule>> {
    let mut stmt = conn.prepare(
        "SELECT id, line_item_id, key, operator, vals FROM targeting_rules
         WHERE line_item_id = ?1 ORDER BY position, id",
    )?;
    let rules = stmt
        .query_map(params![line_item_id], rule_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rules)
}

fn query_creative(conn: &Connection, id: i64) -> Result<Option<Creative>> {
    let sql = format!("SELECT {} FROM creatives WHERE id = ?1", CREATIVE_COLUMNS);
    Ok(conn.query_row(&sql, params![id], creative_from_row).optional()?)
}

fn query_ad_unit(conn: &Connection, id: i64) -> Result<Option<AdUnit>> {
    let sql = format!("SELECT {} FROM ad_units WHERE id = ?1", AD_UNIT_COLUMNS);
    Ok(conn.query_row(&sql, params![id], ad_unit_from_row).optional()?)
}

fn query_ad_unit_links(conn: &Connection, line_item_id: i64) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT ad_unit_id FROM line_item_ad_units WHERE line_item_id = ?1 ORDER BY ad_unit_id",
    )?;
    let ids = stmt
        .query_map(params![line_item_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<i64>>>()?;
    Ok(ids)
}

// ================================================================================================
// SERVING READS
// ================================================================================================

impl AdStore for SqliteStore {
    fn list_active_line_items(&self, ctx: &RequestContext) -> Result<Vec<LineItem>> {
        ctx.check()?;
        let mut conn = self.conn.lock();
        // One read transaction so the join is consistent across the four queries
        let tx = conn.transaction()?;

        let sql = format!(
            "SELECT {} FROM line_items li
             JOIN campaigns c ON li.campaign_id = c.id
             WHERE li.status = 'active' AND c.status = 'active'
             ORDER BY li.priority DESC, li.id ASC",
            LINE_ITEM_COLUMNS
        );
        let mut items = {
            let mut stmt = tx.prepare(&sql)?;
            let rows = stmt
                .query_map([], line_item_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        let position: HashMap<i64, usize> = items
            .iter()
            .enumerate()
            .map(|(idx, li)| (li.id, idx))
            .collect();

        {
            let mut stmt = tx.prepare(
                "SELECT id, line_item_id, key, operator, vals FROM targeting_rules
                 ORDER BY line_item_id, position, id",
            )?;
            for rule in stmt.query_map([], rule_from_row)? {
                let rule = rule?;
                if let Some(&idx) = position.get(&rule.line_item_id) {
                    items[idx].targeting_rules.push(rule);
                }
            }
        }

        {
            let sql = format!(
                "SELECT {} FROM creatives ORDER BY line_item_id, id",
                CREATIVE_COLUMNS
            );
            let mut stmt = tx.prepare(&sql)?;
            for creative in stmt.query_map([], creative_from_row)? {
                let creative = creative?;
                if let Some(&idx) = position.get(&creative.line_item_id) {
                    items[idx].creatives.push(creative);
                }
            }
        }

        {
            let mut stmt = tx.prepare(
                "SELECT line_item_id, ad_unit_id FROM line_item_ad_units
                 ORDER BY line_item_id, ad_unit_id",
            )?;
            let links = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?;
            for link in links {
                let (line_item_id, ad_unit_id) = link?;
                if let Some(&idx) = position.get(&line_item_id) {
                    items[idx].ad_unit_ids.push(ad_unit_id);
                }
            }
        }

        ctx.check()?;
        tx.commit()?;
        Ok(items)
    }

    fn list_ad_units(&self, ctx: &RequestContext) -> Result<Vec<AdUnit>> {
        ctx.check()?;
        let conn = self.conn.lock();
        let sql = format!("SELECT {} FROM ad_units ORDER BY name, id", AD_UNIT_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let units = stmt
            .query_map([], ad_unit_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(units)
    }

    fn record_event(&self, ctx: &RequestContext, event: &Event) -> Result<()> {
        ctx.check()?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO events (
                event_type, impression_id, line_item_id, creative_id, user_id,
                country, platform, ad_unit, section, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                event.event_type.as_str(),
                event.impression_id,
                event.line_item_id,
                event.creative_id,
                event.user_id,
                event.country,
                event.platform,
                event.ad_unit,
                event.section,
                now_ms() as i64
            ],
        )?;
        Ok(())
    }
}

// ================================================================================================
// ADMIN CRUD
// ================================================================================================

impl AdminStore for SqliteStore {
    fn list_campaigns(&self, ctx: &RequestContext) -> Result<Vec<Campaign>> {
        ctx.check()?;
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id, name, status FROM campaigns ORDER BY id")?;
        let campaigns = stmt
            .query_map([], campaign_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(campaigns)
    }

    fn get_campaign(&self, ctx: &RequestContext, id: i64) -> Result<Option<Campaign>> {
        ctx.check()?;
        query_campaign(&self.conn.lock(), id)
    }

    fn create_campaign(&self, ctx: &RequestContext, input: &NewCampaign) -> Result<Campaign> {
        self.write_tx(ctx, |tx| {
            let now = now_ms() as i64;
            let status = input.status.clone().unwrap_or_default();
            tx.execute(
                "INSERT INTO campaigns (name, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3)",
                params![input.name, status.as_str(), now],
            )?;
            Ok(Campaign {
                id: tx.last_insert_rowid(),
                name: input.name.clone(),
                status,
            })
        })
    }

    fn update_campaign(
        &self,
        ctx: &RequestContext,
        id: i64,
        update: &CampaignUpdate,
    ) -> Result<Option<Campaign>> {
        self.write_tx(ctx, |tx| {
            let Some(mut campaign) = query_campaign(tx, id)? else {
                return Ok(None);
            };
            merge_text(&mut campaign.name, &update.name);
            if let Some(status) = &update.status {
                campaign.status = status.clone();
            }
            tx.execute(
                "UPDATE campaigns SET name = ?2, status = ?3, updated_at = ?4 WHERE id = ?1",
                params![id, campaign.name, campaign.status.as_str(), now_ms() as i64],
            )?;
            Ok(Some(campaign))
        })
    }

    fn delete_campaign(&self, ctx: &RequestContext, id: i64) -> Result<bool> {
        self.write_tx(ctx, |tx| {
            Ok(tx.execute("DELETE FROM campaigns WHERE id = ?1", params![id])? > 0)
        })
    }

    fn list_line_items(&self, ctx: &RequestContext, campaign_id: i64) -> Result<Vec<LineItem>> {
        ctx.check()?;
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM line_items li WHERE li.campaign_id = ?1
             ORDER BY li.priority DESC, li.id DESC",
            LINE_ITEM_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let items = stmt
            .query_map(params![campaign_id], line_item_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    fn get_line_item(&self, ctx: &RequestContext, id: i64) -> Result<Option<LineItem>> {
        ctx.check()?;
        query_line_item(&self.conn.lock(), id)
    }

    fn create_line_item(&self, ctx: &RequestContext, input: &NewLineItem) -> Result<LineItem> {
        self.write_tx(ctx, |tx| {
            if query_campaign(tx, input.campaign_id)?.is_none() {
                return Err(EngineError::not_found("campaign", input.campaign_id));
            }
            let priority = if input.priority == 0 {
                DEFAULT_PRIORITY
            } else {
                input.priority
            };
            let weight = input.weight.unwrap_or(DEFAULT_WEIGHT);
            let period = input
                .frequency_cap_period
                .clone()
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| "day".to_string());
            let status = input.status.clone().unwrap_or_default();
            let now = now_ms() as i64;

            tx.execute(
                "INSERT INTO line_items (
                    campaign_id, name, priority, weight, frequency_cap, frequency_cap_period,
                    sov_percentage, status, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
                params![
                    input.campaign_id,
                    input.name,
                    priority,
                    weight,
                    input.frequency_cap,
                    period,
                    input.sov_percentage,
                    status.as_str(),
                    now
                ],
            )?;

            Ok(LineItem {
                id: tx.last_insert_rowid(),
                campaign_id: input.campaign_id,
                name: input.name.clone(),
                priority,
                weight,
                frequency_cap: input.frequency_cap,
                frequency_cap_period: period,
                sov_percentage: input.sov_percentage,
                status,
                targeting_rules: Vec::new(),
                creatives: Vec::new(),
                ad_unit_ids: Vec::new(),
            })
        })
    }

    fn update_line_item(
        &self,
        ctx: &RequestContext,
        id: i64,
        update: &LineItemUpdate,
    ) -> Result<Option<LineItem>> {
        self.write_tx(ctx, |tx| {
            let Some(mut li) = query_line_item(tx, id)? else {
                return Ok(None);
            };
            merge_text(&mut li.name, &update.name);
            merge_text(&mut li.frequency_cap_period, &update.frequency_cap_period);
            if let Some(priority) = update.priority.filter(|p| *p > 0) {
                li.priority = priority;
            }
            if let Some(weight) = update.weight {
                li.weight = weight;
            }
            if let Some(cap) = update.frequency_cap.filter(|c| *c >= 0) {
                li.frequency_cap = cap;
            }
            if let Some(sov) = update.sov_percentage {
                li.sov_percentage = sov;
            }
            if let Some(status) = &update.status {
                li.status = status.clone();
            }

            tx.execute(
                "UPDATE line_items SET name = ?2, priority = ?3, weight = ?4, frequency_cap = ?5,
                    frequency_cap_period = ?6, sov_percentage = ?7, status = ?8, updated_at = ?9
                 WHERE id = ?1",
                params![
                    id,
                    li.name,
                    li.priority,
                    li.weight,
                    li.frequency_cap,
                    li.frequency_cap_period,
                    li.sov_percentage,
                    li.status.as_str(),
                    now_ms() as i64
                ],
            )?;
            Ok(Some(li))
        })
    }

    fn delete_line_item(&self, ctx: &RequestContext, id: i64) -> Result<bool> {
        self.write_tx(ctx, |tx| {
            Ok(tx.execute("DELETE FROM line_items WHERE id = ?1", params![id])? > 0)
        })
    }

    fn get_targeting_rules(
        &self,
        ctx: &RequestContext,
        line_item_id: i64,
    ) -> Result<Vec<TargetingRule>> {
        ctx.check()?;
        query_rules(&self.conn.lock(), line_item_id)
    }

    fn replace_targeting_rules(
        &self,
        ctx: &RequestContext,
        line_item_id: i64,
        rules: &[TargetingRuleInput],
    ) -> Result<Vec<TargetingRule>> {
        self.write_tx(ctx, |tx| {
            if query_line_item(tx, line_item_id)?.is_none() {
                return Err(EngineError::not_found("line item", line_item_id));
            }
            tx.execute(
                "DELETE FROM targeting_rules WHERE line_item_id = ?1",
                params![line_item_id],
            )?;
            for (position, rule) in rules.iter().enumerate() {
                let operator = Operator::from(rule.operator.as_str());
                tx.execute(
                    "INSERT INTO targeting_rules (line_item_id, position, key, operator, vals)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        line_item_id,
                        position as i64,
                        rule.key,
                        operator.as_str(),
                        serde_json::to_string(&rule.values)?
                    ],
                )?;
                ctx.check()?;
            }
            query_rules(tx, line_item_id)
        })
    }

    fn list_creatives(&self, ctx: &RequestContext, line_item_id: i64) -> Result<Vec<Creative>> {
        ctx.check()?;
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM creatives WHERE line_item_id = ?1 ORDER BY id",
            CREATIVE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let creatives = stmt
            .query_map(params![line_item_id], creative_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(creatives)
    }

    fn get_creative(&self, ctx: &RequestContext, id: i64) -> Result<Option<Creative>> {
        ctx.check()?;
        query_creative(&self.conn.lock(), id)
    }

    fn create_creative(&self, ctx: &RequestContext, input: &NewCreative) -> Result<Creative> {
        self.write_tx(ctx, |tx| {
            if query_line_item(tx, input.line_item_id)?.is_none() {
                return Err(EngineError::not_found("line item", input.line_item_id));
            }
            let status = input.status.clone().unwrap_or_default();
            let now = now_ms() as i64;
            tx.execute(
                "INSERT INTO creatives (
                    line_item_id, name, width, height, image_url, click_url, status,
                    created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                params![
                    input.line_item_id,
                    input.name,
                    input.width,
                    input.height,
                    input.image_url,
                    input.click_url,
                    status.as_str(),
                    now
                ],
            )?;
            Ok(Creative {
                id: tx.last_insert_rowid(),
                line_item_id: input.line_item_id,
                name: input.name.clone(),
                width: input.width,
                height: input.height,
                image_url: input.image_url.clone(),
                click_url: input.click_url.clone(),
                status,
            })
        })
    }

    fn update_creative(
        &self,
        ctx: &RequestContext,
        id: i64,
        update: &CreativeUpdate,
    ) -> Result<Option<Creative>> {
        self.write_tx(ctx, |tx| {
            let Some(mut creative) = query_creative(tx, id)? else {
                return Ok(None);
            };
            merge_text(&mut creative.name, &update.name);
            merge_text(&mut creative.image_url, &update.image_url);
            merge_text(&mut creative.click_url, &update.click_url);
            if let Some(width) = update.width.filter(|w| *w > 0) {
                creative.width = width;
            }
            if let Some(height) = update.height.filter(|h| *h > 0) {
                creative.height = height;
            }
            if let Some(status) = &update.status {
                creative.status = status.clone();
            }
            tx.execute(
                "UPDATE creatives SET name = ?2, width = ?3, height = ?4, image_url = ?5,
                    click_url = ?6, status = ?7, updated_at = ?8
                 WHERE id = ?1",
                params![
                    id,
                    creative.name,
                    creative.width,
                    creative.height,
                    creative.image_url,
                    creative.click_url,
                    creative.status.as_str(),
                    now_ms() as i64
                ],
            )?;
            Ok(Some(creative))
        })
    }

    fn delete_creative(&self, ctx: &RequestContext, id: i64) -> Result<bool> {
        self.write_tx(ctx, |tx| {
            Ok(tx.execute("DELETE FROM creatives WHERE id = ?1", params![id])? > 0)
        })
    }

    fn get_ad_unit(&self, ctx: &RequestContext, id: i64) -> Result<Option<AdUnit>> {
        ctx.check()?;
        query_ad_unit(&self.conn.lock(), id)
    }

    fn create_ad_unit(&self, ctx: &RequestContext, input: &NewAdUnit) -> Result<AdUnit> {
        self.write_tx(ctx, |tx| {
            let now = now_ms() as i64;
            tx.execute(
                "INSERT INTO ad_units (
                    code, name, description, platform, sizes, status, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                params![
                    input.code,
                    input.name,
                    input.description,
                    input.platform,
                    serde_json::to_string(&input.sizes)?,
                    Status::Active.as_str(),
                    now
                ],
            )?;
            Ok(AdUnit {
                id: tx.last_insert_rowid(),
                code: input.code.clone(),
                name: input.name.clone(),
                description: input.description.clone(),
                platform: input.platform.clone(),
                sizes: input.sizes.clone(),
                status: Status::Active,
            })
        })
    }

    fn update_ad_unit(
        &self,
        ctx: &RequestContext,
        id: i64,
        update: &AdUnitUpdate,
    ) -> Result<Option<AdUnit>> {
        self.write_tx(ctx, |tx| {
            let Some(mut unit) = query_ad_unit(tx, id)? else {
                return Ok(None);
            };
            merge_text(&mut unit.code, &update.code);
            merge_text(&mut unit.name, &update.name);
            merge_text(&mut unit.description, &update.description);
            merge_text(&mut unit.platform, &update.platform);
            if let Some(sizes) = &update.sizes {
                unit.sizes = sizes.clone();
            }
            if let Some(status) = &update.status {
                unit.status = status.clone();
            }
            tx.execute(
                "UPDATE ad_units SET code = ?2, name = ?3, description = ?4, platform = ?5,
                    sizes = ?6, status = ?7, updated_at = ?8
                 WHERE id = ?1",
                params![
                    id,
                    unit.code,
                    unit.name,
                    unit.description,
                    unit.platform,
                    serde_json::to_string(&unit.sizes)?,
                    unit.status.as_str(),
                    now_ms() as i64
                ],
            )?;
            Ok(Some(unit))
        })
    }

    fn delete_ad_unit(&self, ctx: &RequestContext, id: i64) -> Result<bool> {
        self.write_tx(ctx, |tx| {
            Ok(tx.execute("DELETE FROM ad_units WHERE id = ?1", params![id])? > 0)
        })
    }

    fn get_line_item_ad_units(&self, ctx: &RequestContext, line_item_id: i64) -> Result<Vec<i64>> {
        ctx.check()?;
        query_ad_unit_links(&self.conn.lock(), line_item_id)
    }

    fn replace_line_item_ad_units(
        &self,
        ctx: &RequestContext,
        line_item_id: i64,
        ad_unit_ids: &[i64],
    ) -> Result<Vec<i64>> {
        self.write_tx(ctx, |tx| {
            if query_line_item(tx, line_item_id)?.is_none() {
                return Err(EngineError::not_found("line item", line_item_id));
            }
            tx.execute(
                "DELETE FROM line_item_ad_units WHERE line_item_id = ?1",
                params![line_item_id],
            )?;
            for &ad_unit_id in ad_unit_ids {
                if query_ad_unit(tx, ad_unit_id)?.is_none() {
                    return Err(EngineError::not_found("ad unit", ad_unit_id));
                }
                tx.execute(
                    "INSERT OR IGNORE INTO line_item_ad_units (line_item_id, ad_unit_id)
                     VALUES (?1, ?2)",
                    params![line_item_id, ad_unit_id],
                )?;
            }
            query_ad_unit_links(tx, line_item_id)
        })
    }

    fn recent_events(&self, ctx: &RequestContext, limit: usize) -> Result<Vec<Event>> {
        ctx.check()?;
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT event_type, impression_id, line_item_id, creative_id, user_id,
                    country, platform, ad_unit, section, created_at
             FROM events ORDER BY id DESC LIMIT ?1",
        )?;
        let events = stmt
            .query_map(params![limit as i64], event_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }
}
