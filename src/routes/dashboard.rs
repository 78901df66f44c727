//! GET /api/dashboard/stats
//!
//! Headline counts and revenue figures for the management dashboard.

use bson::{doc, oid::ObjectId, Bson, Document};
use hyper::StatusCode;
use serde::Serialize;

use crate::db::schemas::ResourceKind;
use crate::db::Query;
use crate::routes::{json_response, ApiResult};
use crate::server::AppState;
use crate::types::Result;

/// Number of entries in the top products list
pub const TOP_PRODUCTS: i32 = 5;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub customers: u64,
    pub products: u64,
    pub purchases: u64,
    pub follow_ups: u64,
    pub pending_follow_ups: u64,
    pub revenue: RevenueSummary,
    pub customers_by_status: Vec<StatusCount>,
    pub top_products: Vec<ProductRevenue>,
}

#[derive(Debug, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RevenueSummary {
    pub total: f64,
    pub orders: u64,
}

#[derive(Debug, Serialize)]
pub struct StatusCount {
    /// `None` for records without a status
    pub status: Option<String>,
    pub count: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductRevenue {
    pub product_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub revenue: f64,
    pub quantity: u64,
}

fn number(doc: &Document, key: &str) -> f64 {
    match doc.get(key) {
        Some(Bson::Int32(n)) => *n as f64,
        Some(Bson::Int64(n)) => *n as f64,
        Some(Bson::Double(n)) => *n,
        _ => 0.0,
    }
}

async fn count(state: &AppState, kind: ResourceKind, equals: Document) -> Result<u64> {
    state
        .store
        .count(kind.collection(), &Query::matching(equals))
        .await
}

async fn revenue(state: &AppState) -> Result<RevenueSummary> {
    let rows = state
        .store
        .aggregate(
            ResourceKind::Purchases.collection(),
            vec![doc! {
                "$group": {
                    "_id": Bson::Null,
                    "total": { "$sum": "$amount" },
                    "orders": { "$sum": 1 },
                }
            }],
        )
        .await?;

    Ok(rows
        .first()
        .map(|row| RevenueSummary {
            total: number(row, "total"),
            orders: number(row, "orders") as u64,
        })
        .unwrap_or_default())
}

async fn customers_by_status(state: &AppState) -> Result<Vec<StatusCount>> {
    let rows = state
        .store
        .aggregate(
            ResourceKind::Customers.collection(),
            vec![
                doc! { "$group": { "_id": "$status", "count": { "$sum": 1 } } },
                doc! { "$sort": { "count": -1 } },
            ],
        )
        .await?;

    Ok(rows
        .iter()
        .map(|row| StatusCount {
            status: row.get_str("_id").ok().map(str::to_string),
            count: number(row, "count") as u64,
        })
        .collect())
}

async fn top_products(state: &AppState) -> Result<Vec<ProductRevenue>> {
    let rows = state
        .store
        .aggregate(
            ResourceKind::Purchases.collection(),
            vec![
                doc! {
                    "$group": {
                        "_id": "$product_id",
                        "revenue": { "$sum": "$amount" },
                        "quantity": { "$sum": "$quantity" },
                    }
                },
                doc! { "$sort": { "revenue": -1 } },
                doc! { "$limit": TOP_PRODUCTS },
            ],
        )
        .await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        let product_id = row.get_str("_id").unwrap_or_default().to_string();
        let name = match ObjectId::parse_str(&product_id) {
            Ok(oid) => state
                .store
                .find_by_id(ResourceKind::Products.collection(), &oid)
                .await?
                .and_then(|p| p.get_str("name").ok().map(str::to_string)),
            Err(_) => None,
        };
        out.push(ProductRevenue {
            product_id,
            name,
            revenue: number(row, "revenue"),
            quantity: number(row, "quantity") as u64,
        });
    }
    Ok(out)
}

pub async fn handle_dashboard_stats(state: &AppState) -> ApiResult {
    let stats = DashboardStats {
        customers: count(state, ResourceKind::Customers, doc! {}).await?,
        products: count(state, ResourceKind::Products, doc! {}).await?,
        purchases: count(state, ResourceKind::Purchases, doc! {}).await?,
        follow_ups: count(state, ResourceKind::FollowUps, doc! {}).await?,
        pending_follow_ups: count(state, ResourceKind::FollowUps, doc! { "status": "pending" })
            .await?,
        revenue: revenue(state).await?,
        customers_by_status: customers_by_status(state).await?,
        top_products: top_products(state).await?,
    };

    Ok(json_response(StatusCode::OK, &stats))
}
