use std::time::Duration;

use serde::Serialize;
use tracing::{error, info};
use vastnet_db::models::{Page, format_timestamp};
use vastnet_shared::Multiplier;

use crate::error::LedgerResult;
use crate::services::balance_service::parse_amount;
use crate::state::AppState;

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => error!("Failed to serialize output: {}", e),
    }
}

fn print_page<T: Serialize>(page: &Page<T>) {
    print_json(&page.items);
    println!(
        "Page {}/{} ({} total{}{})",
        page.page,
        page.total_pages(),
        page.total,
        if page.has_prev() { ", has previous" } else { "" },
        if page.has_next() { ", has next" } else { "" },
    );
}

pub fn parse_multiplier(raw: &str) -> Result<Multiplier, String> {
    let value: f64 = raw.trim().parse().map_err(|_| format!("not a number: {}", raw))?;
    Multiplier::try_from(value).map_err(|e| e.to_string())
}

pub fn show_plans(state: &AppState) {
    let catalog = &state.config.catalog;
    for plan in state.subscriptions.get_plan_catalog() {
        let marker = if plan.id == catalog.minimum_plan_id { " (minimum)" } else { "" };
        println!(
            "#{} {} - {} for {} days{}",
            plan.id,
            plan.name,
            catalog.format_amount(plan.cost()),
            plan.period_days(),
            marker
        );
    }
}

pub async fn show_user(
    state: &AppState,
    tg_id: i64,
    username: Option<&str>,
    referrer_id: Option<i64>,
) -> LedgerResult<()> {
    let user = state.users.create_user(tg_id, username, referrer_id).await?;
    let catalog = &state.config.catalog;
    let (min, max) = state.balance.deposit_bounds(tg_id).await?;

    println!("User:     {}", user.display());
    println!("Balance:  {}", catalog.format_amount(user.balance));
    println!("Top-up:   {} .. {}", catalog.format_amount(min), catalog.format_amount(max));
    if let Some(referrer) = user.referrer_id {
        println!("Referrer: {}", referrer);
    }

    let referral = state.referrals.summary(tg_id).await?;
    println!(
        "Referrals: {} (earned {}, rates {} / {})",
        referral.referrals,
        catalog.format_amount(referral.earned),
        referral.multiplier_first,
        referral.multiplier_common
    );

    for sub in state.subscriptions.get_user_subscriptions(tg_id).await? {
        println!(
            "  #{} plan {} [{}] {} - {}",
            sub.id,
            sub.plan_id,
            sub.status(),
            format_timestamp(sub.subscribed_date),
            format_timestamp(sub.expires_date)
        );
    }
    Ok(())
}

pub async fn deposit(state: &AppState, tg_id: i64, amount: &str) -> LedgerResult<()> {
    let amount = parse_amount(amount)?;
    let intent = state.payments.request_deposit(tg_id, amount).await?;
    print_json(&intent);
    Ok(())
}

pub async fn authorize(state: &AppState, tg_id: i64, provider_total: i64, currency: Option<&str>) -> LedgerResult<()> {
    let currency = currency.unwrap_or(state.config.catalog.currency.as_str());
    let amount = state.payments.pre_checkout(tg_id, provider_total, currency).await?;
    println!("Authorized {}", state.config.catalog.format_amount(amount));
    Ok(())
}

pub async fn settle(
    state: &AppState,
    tg_id: i64,
    amount: i64,
    provider_id: &str,
    currency: Option<&str>,
) -> LedgerResult<()> {
    let currency = currency.unwrap_or(state.config.catalog.currency.as_str());
    let settlement = state.payments.settle_payment(tg_id, amount, currency, provider_id).await?;
    print_json(&settlement);
    Ok(())
}

pub async fn purchase(state: &AppState, tg_id: i64, plan_id: i64) -> LedgerResult<()> {
    let subscription = state.subscriptions.purchase_plan(tg_id, plan_id).await?;
    println!(
        "Subscription #{} active until {}",
        subscription.id,
        format_timestamp(subscription.expires_date)
    );
    Ok(())
}

pub async fn renew(state: &AppState, tg_id: i64, subscription_id: i64) -> LedgerResult<()> {
    let subscription = state.subscriptions.renew_subscription(tg_id, subscription_id).await?;
    println!(
        "Subscription #{} renewed until {}",
        subscription.id,
        format_timestamp(subscription.expires_date)
    );
    Ok(())
}

pub async fn toggle(state: &AppState, tg_id: i64, subscription_id: i64) -> LedgerResult<()> {
    let is_active = state.subscriptions.toggle_subscription_renewal(tg_id, subscription_id).await?;
    println!(
        "Auto-renewal for #{} {}",
        subscription_id,
        if is_active { "enabled" } else { "disabled" }
    );
    Ok(())
}

pub async fn admin_set_balance(state: &AppState, tg_id: i64, balance: i64) -> LedgerResult<()> {
    let user = state.admin.admin_set_balance(tg_id, balance).await?;
    println!("Balance of {} is now {}", user.display(), state.config.catalog.format_amount(user.balance));
    Ok(())
}

pub async fn admin_expire(state: &AppState, subscription_id: i64) -> LedgerResult<()> {
    let subscription = state.admin.admin_expire_subscription(subscription_id).await?;
    println!("Subscription #{} is {}", subscription.id, subscription.status());
    Ok(())
}

pub async fn admin_toggle(state: &AppState, subscription_id: i64) -> LedgerResult<()> {
    let is_active = state.admin.admin_toggle_subscription(subscription_id).await?;
    println!("Auto-renewal for #{} set to {}", subscription_id, is_active);
    Ok(())
}

pub async fn admin_referrer(
    state: &AppState,
    tg_id: i64,
    first: Option<Multiplier>,
    common: Option<Multiplier>,
) -> LedgerResult<()> {
    match state.admin.admin_set_referrer_override(tg_id, first, common).await? {
        Some(stored) => print_json(&stored),
        None => println!("Override for {} cleared", tg_id),
    }
    Ok(())
}

pub async fn list_users(state: &AppState, page: i64, per_page: i64) -> LedgerResult<()> {
    print_page(&state.admin.list_users(page, per_page).await?);
    Ok(())
}

pub async fn list_payments(state: &AppState, page: i64, per_page: i64) -> LedgerResult<()> {
    print_page(&state.admin.list_payments(page, per_page).await?);
    Ok(())
}

pub async fn list_subscriptions(state: &AppState, page: i64, per_page: i64) -> LedgerResult<()> {
    print_page(&state.admin.list_subscriptions(page, per_page).await?);
    Ok(())
}

pub async fn audit(state: &AppState) -> LedgerResult<()> {
    let drifts = state.admin.audit_ledger().await?;
    if drifts.is_empty() {
        println!("Ledger is consistent");
    } else {
        print_json(&drifts);
    }
    Ok(())
}

/// Periodic auto-renewal and ledger audit until Ctrl-C.
pub async fn run_worker(state: &AppState, interval: Duration, window: Duration) -> LedgerResult<()> {
    let window_secs = i64::try_from(window.as_secs()).unwrap_or(i64::MAX);
    let mut tick = tokio::time::interval(interval);
    info!(
        "Renewal worker started: every {}s, window {}s",
        interval.as_secs(),
        window_secs
    );

    loop {
        tokio::select! {
            _ = tick.tick() => {
                if let Err(e) = state.subscriptions.process_auto_renewals(window_secs).await {
                    error!("Auto-renewal pass failed: {}", e);
                }
                if let Err(e) = state.admin.audit_ledger().await {
                    error!("Ledger audit failed: {}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received, stopping worker");
                break;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiplier_argument() {
        assert_eq!(parse_multiplier("0.5").unwrap().ppm(), 500_000);
        assert!(parse_multiplier("-1").is_err());
        assert!(parse_multiplier("half").is_err());
    }
}
