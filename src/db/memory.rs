//! In-memory document store
//!
//! Used in dev mode when MongoDB is unreachable, and by tests. It follows the
//! MongoDB adapter's semantics (soft delete, metadata stamping, array
//! membership on equality) and supports the aggregation subset the dashboard
//! needs: `$match`, `$group`, `$sort` and `$limit`.

use bson::{doc, oid::ObjectId, Bson, DateTime, Document};
use std::cmp::Ordering;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::db::schemas::{is_deleted, Metadata, METADATA_KEY};
use crate::db::store::{DocumentStore, Query, SortDir};
use crate::types::{HealthdeskError, Result};

#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<Document>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Resolve a dotted path inside a document
fn get_path<'a>(record: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut parts = path.split('.');
    let mut current = record.get(parts.next()?)?;
    for part in parts {
        current = current.as_document()?.get(part)?;
    }
    Some(current)
}

fn as_number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(*n as f64),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    }
}

fn values_equal(a: &Bson, b: &Bson) -> bool {
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn field_matches(record: &Document, key: &str, expected: &Bson) -> bool {
    match get_path(record, key) {
        Some(Bson::Array(items)) if !matches!(expected, Bson::Array(_)) => {
            items.iter().any(|item| values_equal(item, expected))
        }
        Some(value) => values_equal(value, expected),
        None => matches!(expected, Bson::Null),
    }
}

fn matches_equals(record: &Document, equals: &Document) -> bool {
    equals
        .iter()
        .all(|(key, expected)| field_matches(record, key, expected))
}

fn matches_query(record: &Document, query: &Query) -> bool {
    if is_deleted(record) || !matches_equals(record, &query.equals) {
        return false;
    }

    match &query.search {
        None => true,
        Some(search) => {
            let needle = search.term.to_lowercase();
            search.fields.iter().any(|field| {
                matches!(
                    get_path(record, field),
                    Some(Bson::String(s)) if s.to_lowercase().contains(&needle)
                )
            })
        }
    }
}

fn type_rank(value: &Bson) -> u8 {
    match value {
        Bson::Null => 0,
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) => 1,
        Bson::String(_) => 2,
        Bson::Document(_) => 3,
        Bson::Array(_) => 4,
        Bson::ObjectId(_) => 5,
        Bson::Boolean(_) => 6,
        Bson::DateTime(_) => 7,
        _ => 8,
    }
}

/// Order values the way MongoDB orders mixed types
fn compare_bson(a: &Bson, b: &Bson) -> Ordering {
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return x.partial_cmp(&y).unwrap_or(Ordering::Equal);
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => x.cmp(y),
        (Bson::Boolean(x), Bson::Boolean(y)) => x.cmp(y),
        (Bson::DateTime(x), Bson::DateTime(y)) => x.timestamp_millis().cmp(&y.timestamp_millis()),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => x.bytes().cmp(&y.bytes()),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn sort_records(records: &mut [Document], keys: &[(String, SortDir)]) {
    records.sort_by(|a, b| {
        for (key, dir) in keys {
            let left = get_path(a, key).unwrap_or(&Bson::Null);
            let right = get_path(b, key).unwrap_or(&Bson::Null);
            let ordering = match dir {
                SortDir::Asc => compare_bson(left, right),
                SortDir::Desc => compare_bson(right, left),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

fn unsupported(message: String) -> HealthdeskError {
    HealthdeskError::Validation(format!("In-memory aggregation: {message}"))
}

/// Evaluate a `$group` key or `$sum` operand against one record
fn eval_operand(record: &Document, operand: &Bson) -> Bson {
    match operand {
        Bson::String(s) if s.starts_with('$') => {
            get_path(record, &s[1..]).cloned().unwrap_or(Bson::Null)
        }
        other => other.clone(),
    }
}

struct GroupSum {
    int_total: i64,
    float_total: f64,
    is_float: bool,
}

impl GroupSum {
    fn new() -> Self {
        Self {
            int_total: 0,
            float_total: 0.0,
            is_float: false,
        }
    }

    fn add(&mut self, value: &Bson) {
        match value {
            Bson::Int32(n) => self.add_int(i64::from(*n)),
            Bson::Int64(n) => self.add_int(*n),
            Bson::Double(n) => {
                self.is_float = true;
                self.float_total += n;
            }
            // $sum ignores non-numeric values
            _ => {}
        }
    }

    // Integer overflow promotes the running total to a double, as MongoDB does
    fn add_int(&mut self, n: i64) {
        if self.is_float {
            self.float_total += n as f64;
            return;
        }
        match self.int_total.checked_add(n) {
            Some(total) => self.int_total = total,
            None => {
                self.is_float = true;
                self.float_total += self.int_total as f64 + n as f64;
                self.int_total = 0;
            }
        }
    }

    fn finish(&self) -> Bson {
        if self.is_float {
            Bson::Double(self.float_total + self.int_total as f64)
        } else {
            Bson::Int64(self.int_total)
        }
    }
}

fn group_stage(records: Vec<Document>, spec: &Document) -> Result<Vec<Document>> {
    let key_expr = spec
        .get("_id")
        .ok_or_else(|| unsupported("$group requires _id".into()))?;

    let mut accumulators = Vec::new();
    for (name, acc) in spec.iter().filter(|(k, _)| k.as_str() != "_id") {
        let operand = acc
            .as_document()
            .and_then(|d| d.get("$sum"))
            .ok_or_else(|| unsupported(format!("accumulator '{name}' must be $sum")))?;
        accumulators.push((name.clone(), operand.clone()));
    }

    let mut keys: Vec<Bson> = Vec::new();
    let mut sums: Vec<Vec<GroupSum>> = Vec::new();

    for record in &records {
        let key = eval_operand(record, key_expr);
        let slot = match keys.iter().position(|k| values_equal(k, &key)) {
            Some(i) => i,
            None => {
                keys.push(key);
                sums.push(accumulators.iter().map(|_| GroupSum::new()).collect());
                keys.len() - 1
            }
        };
        for (i, (_, operand)) in accumulators.iter().enumerate() {
            sums[slot][i].add(&eval_operand(record, operand));
        }
    }

    Ok(keys
        .into_iter()
        .zip(sums)
        .map(|(key, totals)| {
            let mut out = doc! { "_id": key };
            for ((name, _), total) in accumulators.iter().zip(totals) {
                out.insert(name.clone(), total.finish());
            }
            out
        })
        .collect())
}

fn run_pipeline(mut records: Vec<Document>, pipeline: &[Document]) -> Result<Vec<Document>> {
    for stage in pipeline {
        let (op, arg) = match stage.iter().next() {
            Some(entry) if stage.len() == 1 => entry,
            _ => return Err(unsupported("each stage must have exactly one operator".into())),
        };

        records = match (op.as_str(), arg) {
            ("$match", Bson::Document(equals)) => records
                .into_iter()
                .filter(|r| matches_equals(r, equals))
                .collect(),
            ("$group", Bson::Document(spec)) => group_stage(records, spec)?,
            ("$sort", Bson::Document(spec)) => {
                let keys: Vec<(String, SortDir)> = spec
                    .iter()
                    .map(|(k, v)| {
                        let dir = if as_number(v).unwrap_or(1.0) < 0.0 {
                            SortDir::Desc
                        } else {
                            SortDir::Asc
                        };
                        (k.clone(), dir)
                    })
                    .collect();
                sort_records(&mut records, &keys);
                records
            }
            ("$limit", n) => {
                let n = as_number(n).ok_or_else(|| unsupported("$limit must be a number".into()))?;
                records.truncate(n.max(0.0) as usize);
                records
            }
            (other, _) => return Err(unsupported(format!("stage {other} is not supported"))),
        };
    }
    Ok(records)
}

#[async_trait::async_trait]
impl DocumentStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn find(&self, collection: &str, query: &Query) -> Result<Vec<Document>> {
        let collections = self.collections.read().await;
        let mut found: Vec<Document> = collections
            .get(collection)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| matches_query(r, query))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some((field, dir)) = &query.sort {
            sort_records(&mut found, &[(field.clone(), *dir)]);
        }

        let skipped = found.into_iter().skip(query.skip as usize);
        Ok(if query.limit > 0 {
            skipped.take(query.limit as usize).collect()
        } else {
            skipped.collect()
        })
    }

    async fn count(&self, collection: &str, query: &Query) -> Result<u64> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|records| records.iter().filter(|r| matches_query(r, query)).count() as u64)
            .unwrap_or(0))
    }

    async fn find_one(&self, collection: &str, equals: Document) -> Result<Option<Document>> {
        let query = Query::matching(equals);
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|records| records.iter().find(|r| matches_query(r, &query)).cloned()))
    }

    async fn find_by_id(&self, collection: &str, id: &ObjectId) -> Result<Option<Document>> {
        self.find_one(collection, doc! { "_id": *id }).await
    }

    async fn insert(&self, collection: &str, mut record: Document) -> Result<ObjectId> {
        let id = ObjectId::new();
        record.insert("_id", id);
        record.insert(METADATA_KEY, Metadata::new().to_document());

        let mut collections = self.collections.write().await;
        collections
            .entry(collection.to_string())
            .or_default()
            .push(record);
        Ok(id)
    }

    async fn update_by_id(&self, collection: &str, id: &ObjectId, set: Document) -> Result<bool> {
        let mut collections = self.collections.write().await;
        let Some(record) = collections.get_mut(collection).and_then(|records| {
            records
                .iter_mut()
                .find(|r| !is_deleted(r) && r.get_object_id("_id").ok() == Some(*id))
        }) else {
            return Ok(false);
        };

        for (key, value) in set {
            record.insert(key, value);
        }
        let mut metadata = Metadata::of(record);
        metadata.updated_at = Some(DateTime::now());
        record.insert(METADATA_KEY, metadata.to_document());
        Ok(true)
    }

    async fn delete_by_id(&self, collection: &str, id: &ObjectId) -> Result<bool> {
        let mut collections = self.collections.write().await;
        let Some(record) = collections.get_mut(collection).and_then(|records| {
            records
                .iter_mut()
                .find(|r| !is_deleted(r) && r.get_object_id("_id").ok() == Some(*id))
        }) else {
            return Ok(false);
        };

        let now = DateTime::now();
        let mut metadata = Metadata::of(record);
        metadata.is_deleted = true;
        metadata.deleted_at = Some(now);
        metadata.updated_at = Some(now);
        record.insert(METADATA_KEY, metadata.to_document());
        Ok(true)
    }

    async fn aggregate(&self, collection: &str, pipeline: Vec<Document>) -> Result<Vec<Document>> {
        let live: Vec<Document> = {
            let collections = self.collections.read().await;
            collections
                .get(collection)
                .map(|records| records.iter().filter(|r| !is_deleted(r)).cloned().collect())
                .unwrap_or_default()
        };
        run_pipeline(live, &pipeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::store::Search;

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        for (name, status, amount, tags) in [
            ("Lin Wei", "active", 120.0, vec!["vip"]),
            ("Zhao Min", "active", 80.5, vec![]),
            ("Chen Li", "lapsed", 40.0, vec!["vip", "referral"]),
        ] {
            store
                .insert(
                    "customers",
                    doc! { "name": name, "status": status, "spent": amount, "tags": tags },
                )
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_insert_stamps_metadata() {
        let store = MemoryStore::new();
        let id = store.insert("tags", doc! { "name": "vip" }).await.unwrap();
        let record = store.find_by_id("tags", &id).await.unwrap().unwrap();
        let metadata = Metadata::of(&record);
        assert!(!metadata.is_deleted);
        assert!(metadata.created_at.is_some());
    }

    #[tokio::test]
    async fn test_equality_and_array_membership() {
        let store = seeded().await;
        let active = store
            .count("customers", &Query::matching(doc! { "status": "active" }))
            .await
            .unwrap();
        assert_eq!(active, 2);

        let vip = store
            .find("customers", &Query::matching(doc! { "tags": "vip" }))
            .await
            .unwrap();
        assert_eq!(vip.len(), 2);
    }

    #[tokio::test]
    async fn test_search_sort_and_paging() {
        let store = seeded().await;
        let query = Query {
            search: Some(Search {
                fields: vec!["name"],
                term: "LI".into(),
            }),
            sort: Some(("spent".into(), SortDir::Asc)),
            ..Query::default()
        };
        let found = store.find("customers", &query).await.unwrap();
        let names: Vec<&str> = found.iter().map(|r| r.get_str("name").unwrap()).collect();
        assert_eq!(names, vec!["Chen Li", "Lin Wei"]);

        let page = Query {
            sort: Some(("spent".into(), SortDir::Desc)),
            skip: 1,
            limit: 1,
            ..Query::default()
        };
        let found = store.find("customers", &page).await.unwrap();
        assert_eq!(found[0].get_str("name").unwrap(), "Zhao Min");
    }

    #[tokio::test]
    async fn test_soft_delete_hides_record() {
        let store = MemoryStore::new();
        let id = store.insert("tags", doc! { "name": "old" }).await.unwrap();

        assert!(store.delete_by_id("tags", &id).await.unwrap());
        assert!(store.find_by_id("tags", &id).await.unwrap().is_none());
        assert!(!store.delete_by_id("tags", &id).await.unwrap());
        assert!(!store.update_by_id("tags", &id, doc! { "name": "x" }).await.unwrap());
        assert_eq!(store.count("tags", &Query::all()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_update_sets_fields() {
        let store = MemoryStore::new();
        let id = store.insert("tags", doc! { "name": "old" }).await.unwrap();
        assert!(store.update_by_id("tags", &id, doc! { "name": "new" }).await.unwrap());
        let record = store.find_by_id("tags", &id).await.unwrap().unwrap();
        assert_eq!(record.get_str("name").unwrap(), "new");
    }

    #[tokio::test]
    async fn test_group_and_sort() {
        let store = seeded().await;
        let result = store
            .aggregate(
                "customers",
                vec![
                    doc! { "$group": { "_id": "$status", "count": { "$sum": 1 }, "spent": { "$sum": "$spent" } } },
                    doc! { "$sort": { "count": -1 } },
                ],
            )
            .await
            .unwrap();

        assert_eq!(result.len(), 2);
        assert_eq!(result[0].get_str("_id").unwrap(), "active");
        assert_eq!(result[0].get_i64("count").unwrap(), 2);
        assert_eq!(result[0].get_f64("spent").unwrap(), 200.5);
    }

    #[tokio::test]
    async fn test_group_all_and_limit() {
        let store = seeded().await;
        let result = store
            .aggregate(
                "customers",
                vec![
                    doc! { "$match": { "status": "active" } },
                    doc! { "$group": { "_id": Bson::Null, "n": { "$sum": 1 } } },
                    doc! { "$limit": 1 },
                ],
            )
            .await
            .unwrap();
        assert_eq!(result, vec![doc! { "_id": Bson::Null, "n": 2_i64 }]);
    }

    #[tokio::test]
    async fn test_integer_sum_overflow_becomes_double() {
        let store = MemoryStore::new();
        for _ in 0..2 {
            store
                .insert("purchases", doc! { "quantity": i64::MAX })
                .await
                .unwrap();
        }
        store
            .insert("purchases", doc! { "quantity": 3_i32 })
            .await
            .unwrap();

        let result = store
            .aggregate(
                "purchases",
                vec![doc! { "$group": { "_id": Bson::Null, "quantity": { "$sum": "$quantity" } } }],
            )
            .await
            .unwrap();

        let total = result[0].get_f64("quantity").unwrap();
        assert_eq!(total, 2.0 * i64::MAX as f64 + 3.0);
    }

    #[tokio::test]
    async fn test_unsupported_stage() {
        let store = seeded().await;
        let result = store
            .aggregate("customers", vec![doc! { "$lookup": { "from": "x" } }])
            .await;
        assert!(matches!(result, Err(HealthdeskError::Validation(_))));
    }
}
