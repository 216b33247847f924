use anyhow::{Context, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use vastnet_shared::{PlanCatalog, ReferralPolicy};

/// Startup configuration. Built once in `main` and handed to every service.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    pub bot_token: Option<String>,
    pub admins: Vec<i64>,
    pub file_logging: bool,
    pub log_dir: PathBuf,
    pub catalog: PlanCatalog,
    pub referral: ReferralPolicy,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:data/ledger.db".to_string());
        if !database_url.starts_with("sqlite:") {
            return Err(anyhow::anyhow!("DATABASE_URL must start with sqlite:, got {}", database_url));
        }

        let max_connections = match env::var("DB_MAX_CONNECTIONS") {
            Ok(raw) => raw
                .trim()
                .parse::<u32>()
                .with_context(|| format!("Invalid DB_MAX_CONNECTIONS: {}", raw))?,
            Err(_) => 5,
        };

        let plans_path = env::var("PLANS_PATH").unwrap_or_else(|_| "data/plans.json".to_string());
        let referrers_path = env::var("REFERRERS_PATH").unwrap_or_else(|_| "data/referrers.json".to_string());

        let catalog = load_catalog(Path::new(&plans_path))?;
        let referral = load_referral_policy(Path::new(&referrers_path))?;

        let bot_token = env::var("BOT_TOKEN").ok().filter(|t| !t.trim().is_empty());
        let admins = parse_admin_list(&env::var("ADMIN_LIST").unwrap_or_default())?;
        let (file_logging, log_dir) = logging_from_env();

        Ok(Self {
            database_url,
            max_connections,
            bot_token,
            admins,
            file_logging,
            log_dir,
            catalog,
            referral,
        })
    }

    pub fn is_admin(&self, tg_id: i64) -> bool {
        self.admins.contains(&tg_id)
    }
}

pub fn load_catalog(path: &Path) -> Result<PlanCatalog> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read plan catalog {}", path.display()))?;
    let catalog = PlanCatalog::from_json(&raw)
        .with_context(|| format!("Invalid plan catalog {}", path.display()))?;
    info!(
        "Loaded {} plans from {} (minimum cost {})",
        catalog.plans.len(),
        path.display(),
        catalog.minimum_cost()
    );
    Ok(catalog)
}

/// `(FILE_LOGGING, LOG_DIR)`. Read before the rest of the config so that
/// config loading itself is logged.
pub fn logging_from_env() -> (bool, PathBuf) {
    let file_logging = env::var("FILE_LOGGING")
        .map(|v| parse_bool(&v))
        .unwrap_or(false);
    let log_dir = PathBuf::from(env::var("LOG_DIR").unwrap_or_else(|_| ".".to_string()));
    (file_logging, log_dir)
}

/// A missing policy file disables referral bonuses; a malformed one is fatal.
pub fn load_referral_policy(path: &Path) -> Result<ReferralPolicy> {
    if !path.exists() {
        warn!("Referral policy {} not found, referral bonuses disabled", path.display());
        return Ok(ReferralPolicy::disabled());
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read referral policy {}", path.display()))?;
    ReferralPolicy::from_json(&raw)
        .with_context(|| format!("Invalid referral policy {}", path.display()))
}

/// Accepts a JSON array (`[1, 2]`) or a comma separated list (`1,2`).
pub fn parse_admin_list(raw: &str) -> Result<Vec<i64>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    if raw.starts_with('[') {
        return serde_json::from_str(raw).context("ADMIN_LIST is not a JSON array of ids");
    }
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<i64>().with_context(|| format!("Invalid admin id in ADMIN_LIST: {}", s)))
        .collect()
}

fn parse_bool(raw: &str) -> bool {
    matches!(raw.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
pub(crate) fn test_catalog() -> PlanCatalog {
    PlanCatalog::from_json(
        r#"{
            "currency": "RUB",
            "currency_sign": "₽",
            "multiplier": 100,
            "max_balance": 3000,
            "minimum_plan_id": 0,
            "plans": [
                { "id": 0, "name": "1 month", "price": 75, "months": 1 },
                { "id": 1, "name": "2 months", "price": 75, "months": 2, "duration_days": 30 },
                { "id": 2, "name": "6 months", "price": 65, "months": 6 },
                { "id": 3, "name": "12 months", "price": 60, "months": 12, "duration_days": 365 }
            ]
        }"#,
    )
    .expect("test catalog is valid")
}

#[cfg(test)]
impl Config {
    pub(crate) fn for_tests(referral: ReferralPolicy) -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            max_connections: 1,
            bot_token: None,
            admins: vec![1000],
            file_logging: false,
            log_dir: PathBuf::from("."),
            catalog: test_catalog(),
            referral,
        }
    }
}
