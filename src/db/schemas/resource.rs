//! CRM resource collections and their field lists
//!
//! Each resource accepts a fixed set of fields; anything else in a request
//! body is rejected before it reaches the store.

use bson::{doc, Document};
use mongodb::options::IndexOptions;

use crate::db::schemas::fields::{FieldKind, FieldSpec};
use crate::db::schemas::metadata::IS_DELETED_PATH;

use FieldKind::*;

/// The record collections exposed under `/api/{resource}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Customers,
    Products,
    Purchases,
    FollowUps,
    HealthPlans,
    Users,
    Categories,
    Tags,
}

const fn opt(name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        required: false,
    }
}

const fn req(name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        required: true,
    }
}

const CUSTOMER_FIELDS: &[FieldSpec] = &[
    req("name", Text),
    req("phone", Text),
    opt("email", Text),
    opt("gender", Text),
    opt("birth_date", Date),
    opt("address", Text),
    opt("status", Text),
    opt("source", Text),
    opt("tags", TextList),
    opt("health_conditions", TextList),
    opt("assigned_to", Reference),
    opt("notes", Text),
];

const PRODUCT_FIELDS: &[FieldSpec] = &[
    req("name", Text),
    req("price", Number),
    opt("sku", Text),
    opt("category_id", Reference),
    opt("stock", Integer),
    opt("unit", Text),
    opt("description", Text),
    opt("tags", TextList),
    opt("is_active", Bool),
];

const PURCHASE_FIELDS: &[FieldSpec] = &[
    req("customer_id", Reference),
    req("product_id", Reference),
    req("quantity", Integer),
    req("amount", Number),
    opt("purchased_at", Date),
    opt("status", Text),
    opt("notes", Text),
];

const FOLLOW_UP_FIELDS: &[FieldSpec] = &[
    req("customer_id", Reference),
    req("content", Text),
    opt("channel", Text),
    opt("scheduled_at", Date),
    opt("status", Text),
    opt("result", Text),
];

const HEALTH_PLAN_FIELDS: &[FieldSpec] = &[
    req("customer_id", Reference),
    req("title", Text),
    opt("goals", TextList),
    opt("recommendations", Text),
    opt("product_ids", TextList),
    opt("start_date", Date),
    opt("end_date", Date),
    opt("status", Text),
];

const USER_FIELDS: &[FieldSpec] = &[
    req("email", Text),
    req("name", Text),
    req("role", RoleName),
    req("password", Password),
    opt("phone", Text),
    opt("is_active", Bool),
];

const CATEGORY_FIELDS: &[FieldSpec] = &[
    req("name", Text),
    opt("description", Text),
    opt("parent_id", Reference),
    opt("sort_order", Integer),
];

const TAG_FIELDS: &[FieldSpec] = &[req("name", Text), opt("color", Text)];

impl ResourceKind {
    pub const ALL: [ResourceKind; 8] = [
        ResourceKind::Customers,
        ResourceKind::Products,
        ResourceKind::Purchases,
        ResourceKind::FollowUps,
        ResourceKind::HealthPlans,
        ResourceKind::Users,
        ResourceKind::Categories,
        ResourceKind::Tags,
    ];

    /// MongoDB collection name
    pub fn collection(&self) -> &'static str {
        match self {
            ResourceKind::Customers => "customers",
            ResourceKind::Products => "products",
            ResourceKind::Purchases => "purchases",
            ResourceKind::FollowUps => "follow_ups",
            ResourceKind::HealthPlans => "health_plans",
            ResourceKind::Users => "users",
            ResourceKind::Categories => "categories",
            ResourceKind::Tags => "tags",
        }
    }

    /// Path segment under `/api/`
    pub fn path_segment(&self) -> &'static str {
        match self {
            ResourceKind::FollowUps => "follow-ups",
            ResourceKind::HealthPlans => "health-plans",
            other => other.collection(),
        }
    }

    pub fn from_path_segment(segment: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.path_segment() == segment)
    }

    /// Singular label for messages
    pub fn label(&self) -> &'static str {
        match self {
            ResourceKind::Customers => "Customer",
            ResourceKind::Products => "Product",
            ResourceKind::Purchases => "Purchase",
            ResourceKind::FollowUps => "Follow-up",
            ResourceKind::HealthPlans => "Health plan",
            ResourceKind::Users => "User",
            ResourceKind::Categories => "Category",
            ResourceKind::Tags => "Tag",
        }
    }

    pub fn fields(&self) -> &'static [FieldSpec] {
        match self {
            ResourceKind::Customers => CUSTOMER_FIELDS,
            ResourceKind::Products => PRODUCT_FIELDS,
            ResourceKind::Purchases => PURCHASE_FIELDS,
            ResourceKind::FollowUps => FOLLOW_UP_FIELDS,
            ResourceKind::HealthPlans => HEALTH_PLAN_FIELDS,
            ResourceKind::Users => USER_FIELDS,
            ResourceKind::Categories => CATEGORY_FIELDS,
            ResourceKind::Tags => TAG_FIELDS,
        }
    }

    pub fn field(&self, name: &str) -> Option<&'static FieldSpec> {
        self.fields().iter().find(|f| f.name == name)
    }

    /// Fields matched by the `search` list parameter
    pub fn search_fields(&self) -> &'static [&'static str] {
        match self {
            ResourceKind::Customers => &["name", "phone", "email"],
            ResourceKind::Products => &["name", "sku"],
            ResourceKind::Purchases => &["notes"],
            ResourceKind::FollowUps => &["content"],
            ResourceKind::HealthPlans => &["title"],
            ResourceKind::Users => &["email", "name"],
            ResourceKind::Categories => &["name"],
            ResourceKind::Tags => &["name"],
        }
    }

    /// Index definitions applied when the MongoDB store starts
    pub fn indexes(&self) -> Vec<(Document, Option<IndexOptions>)> {
        let live_only = doc! { IS_DELETED_PATH: false };

        match self {
            ResourceKind::Users => vec![(
                doc! { "email": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .partial_filter_expression(live_only)
                        .name("email_unique".to_string())
                        .build(),
                ),
            )],
            ResourceKind::Customers => vec![
                (doc! { "phone": 1 }, Some(named("phone_index"))),
                (doc! { "assigned_to": 1 }, Some(named("assigned_to_index"))),
            ],
            ResourceKind::Purchases => vec![
                (doc! { "customer_id": 1 }, Some(named("customer_index"))),
                (doc! { "product_id": 1 }, Some(named("product_index"))),
            ],
            ResourceKind::FollowUps => vec![(
                doc! { "customer_id": 1, "status": 1 },
                Some(named("customer_status_index")),
            )],
            ResourceKind::HealthPlans => {
                vec![(doc! { "customer_id": 1 }, Some(named("customer_index")))]
            }
            ResourceKind::Products => vec![(doc! { "sku": 1 }, Some(named("sku_index")))],
            ResourceKind::Categories | ResourceKind::Tags => {
                vec![(doc! { "name": 1 }, Some(named("name_index")))]
            }
        }
    }
}

fn named(name: &str) -> IndexOptions {
    IndexOptions::builder().name(name.to_string()).build()
}
