use async_trait::async_trait;
use chrono::{DateTime, Utc};
use decision_core::{
    Action, ConsensusResult, CoreError, CoreResult, Decision, DecisionStore, Outcome, RiskAssessment,
};
use sqlx::any::AnyRow;
use sqlx::Row;

const DECISION_COLUMNS: &str = "id, symbol, timestamp, action, confidence, consensus_json, \
     risk_json, executed, order_ref, outcome, realized_pnl, reasoning";

/// Authoritative decision history.
/// Consensus and risk assessment are stored as JSON text.
pub struct SqlDecisionStore {
    db_pool: sqlx::AnyPool,
}

impl SqlDecisionStore {
    pub fn new(db_pool: sqlx::AnyPool) -> Self {
        Self { db_pool }
    }

    /// Connect to `database_url` (drivers are installed on first use).
    pub async fn connect(database_url: &str) -> CoreResult<Self> {
        sqlx::any::install_default_drivers();
        let pool = sqlx::any::AnyPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(store_err)?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &sqlx::AnyPool {
        &self.db_pool
    }

    /// Create the decision table and indexes if missing.
    pub async fn init_tables(&self) -> CoreResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS decisions (
                id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                action TEXT NOT NULL,
                confidence REAL NOT NULL,
                consensus_json TEXT NOT NULL,
                risk_json TEXT NOT NULL,
                executed INTEGER NOT NULL DEFAULT 0,
                order_ref TEXT,
                outcome TEXT NOT NULL DEFAULT 'pending',
                realized_pnl REAL,
                reasoning TEXT NOT NULL DEFAULT '',
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.db_pool)
        .await
        .map_err(store_err)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_decisions_symbol ON decisions(symbol, timestamp)")
            .execute(&self.db_pool)
            .await
            .ok();

        Ok(())
    }

    pub async fn get(&self, id: &str) -> CoreResult<Option<Decision>> {
        let row = sqlx::query(&format!("SELECT {} FROM decisions WHERE id = ?", DECISION_COLUMNS))
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await
            .map_err(store_err)?;
        row.as_ref().map(decision_from_row).transpose()
    }

    /// Most recent decisions for `symbol`, newest first.
    pub async fn recent(&self, symbol: &str, limit: usize) -> CoreResult<Vec<Decision>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM decisions WHERE symbol = ? ORDER BY timestamp DESC LIMIT ?",
            DECISION_COLUMNS
        ))
        .bind(symbol)
        .bind(limit as i64)
        .fetch_all(&self.db_pool)
        .await
        .map_err(store_err)?;
        rows.iter().map(decision_from_row).collect()
    }
}

#[async_trait]
impl DecisionStore for SqlDecisionStore {
    /// Insert or overwrite by id, so re-saving after execution is safe.
    async fn save(&self, decision: &Decision) -> CoreResult<()> {
        let consensus_json = serde_json::to_string(&decision.consensus)
            .map_err(|e| CoreError::Store(format!("encode consensus: {}", e)))?;
        let risk_json = serde_json::to_string(&decision.risk)
            .map_err(|e| CoreError::Store(format!("encode risk: {}", e)))?;

        sqlx::query(
            "INSERT INTO decisions
             (id, symbol, timestamp, action, confidence, consensus_json, risk_json,
              executed, order_ref, outcome, realized_pnl, reasoning, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
              executed = excluded.executed,
              order_ref = excluded.order_ref,
              outcome = excluded.outcome,
              realized_pnl = excluded.realized_pnl,
              reasoning = excluded.reasoning,
              risk_json = excluded.risk_json,
              updated_at = excluded.updated_at",
        )
        .bind(&decision.id)
        .bind(&decision.symbol)
        .bind(decision.timestamp.to_rfc3339())
        .bind(decision.action.to_label())
        .bind(decision.confidence)
        .bind(&consensus_json)
        .bind(&risk_json)
        .bind(decision.executed as i64)
        .bind(decision.order_ref.as_deref())
        .bind(decision.outcome.as_str())
        .bind(decision.realized_pnl)
        .bind(&decision.reasoning)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.db_pool)
        .await
        .map_err(store_err)?;

        tracing::debug!(id = %decision.id, symbol = %decision.symbol, "Decision saved");
        Ok(())
    }

    async fn update_outcome(&self, id: &str, outcome: Outcome, pnl: f64) -> CoreResult<()> {
        let result = sqlx::query(
            "UPDATE decisions SET outcome = ?, realized_pnl = ?, updated_at = ? WHERE id = ?",
        )
        .bind(outcome.as_str())
        .bind(pnl)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.db_pool)
        .await
        .map_err(store_err)?;

        if result.rows_affected() == 0 {
            return Err(CoreError::Store(format!("decision {} not found", id)));
        }
        Ok(())
    }
}

fn store_err(e: sqlx::Error) -> CoreError {
    CoreError::Store(e.to_string())
}

fn decision_from_row(row: &AnyRow) -> CoreResult<Decision> {
    let get_str = |col: &str| row.try_get::<String, _>(col).map_err(store_err);

    let timestamp = DateTime::parse_from_rfc3339(&get_str("timestamp")?)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| CoreError::Store(format!("bad timestamp: {}", e)))?;
    let action = get_str("action")?
        .parse::<Action>()
        .map_err(|e| CoreError::Store(format!("bad action: {}", e)))?;
    let outcome = get_str("outcome")?.parse::<Outcome>().map_err(CoreError::Store)?;
    let consensus: ConsensusResult = serde_json::from_str(&get_str("consensus_json")?)
        .map_err(|e| CoreError::Store(format!("decode consensus: {}", e)))?;
    let risk: RiskAssessment = serde_json::from_str(&get_str("risk_json")?)
        .map_err(|e| CoreError::Store(format!("decode risk: {}", e)))?;

    Ok(Decision {
        id: get_str("id")?,
        symbol: get_str("symbol")?,
        timestamp,
        action,
        confidence: row.try_get("confidence").map_err(store_err)?,
        consensus,
        risk,
        executed: row.try_get::<i64, _>("executed").map_err(store_err)? != 0,
        order_ref: row.try_get("order_ref").map_err(store_err)?,
        outcome,
        realized_pnl: row.try_get("realized_pnl").map_err(store_err)?,
        reasoning: get_str("reasoning")?,
    })
}
