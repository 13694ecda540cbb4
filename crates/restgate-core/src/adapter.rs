//! The Storage Adapter contract (§6.2): the primitives the core invokes
//! instead of generating SQL itself. A concrete implementation lives in
//! the `restgate-adapter` crate; the core only depends on this trait.

use std::cell::Cell;
use std::future::Future;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::query::QueryList;
use crate::user::{Auth, User};
use crate::value::Value;

/// The target of a `field()` primitive: either a bare identifier or an
/// already-loaded object value (the two overloads named in §6.2).
pub enum FieldTarget<'a> {
    Oid(i64),
    Value(&'a Value),
}

/// Per-request transaction state: a reentrant in-transaction flag plus
/// a rollback-only flag, matching §5's "begin; attempt; if-any-failure
/// cancel; end" pattern without a thread-local.
pub struct Worker {
    pub schema: String,
    in_transaction: Cell<bool>,
    rollback_only: Cell<bool>,
}

impl Worker {
    pub fn new(schema: impl Into<String>) -> Self {
        Self { schema: schema.into(), in_transaction: Cell::new(false), rollback_only: Cell::new(false) }
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction.get()
    }

    pub fn mark_rollback_only(&self) {
        self.rollback_only.set(true);
    }

    /// Runs `f` inside a transaction. A re-entrant call (the Worker is
    /// already inside one) does not re-begin; if it fails, it marks the
    /// outermost transaction rollback-only instead of canceling inline.
    /// Only the outermost call actually commits or cancels.
    pub async fn perform_in_transaction<A, F, Fut, T>(&self, adapter: &A, f: F) -> Result<T>
    where
        A: StorageAdapter + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let already_in = self.in_transaction.replace(true);
        if !already_in {
            adapter.begin().await?;
        }

        let result = f().await;

        if already_in {
            if result.is_err() {
                self.rollback_only.set(true);
            }
            return result;
        }

        let should_commit = result.is_ok() && !self.rollback_only.get();
        if should_commit {
            adapter.commit().await?;
        } else {
            adapter.cancel().await?;
        }
        self.in_transaction.set(false);
        self.rollback_only.set(false);
        result
    }
}

/// The Storage Adapter contract consumed by the Resource Family and
/// Hydrator. Implementors own SQL generation and connection pooling;
/// the core only ever calls these primitives.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    async fn select(&self, worker: &Worker, list: &QueryList) -> Result<Value>;
    async fn create(&self, worker: &Worker, scheme: &str, value: Value) -> Result<Value>;
    async fn save(&self, worker: &Worker, scheme: &str, oid: i64, value: Value, fields: &[String]) -> Result<Value>;
    async fn patch(&self, worker: &Worker, scheme: &str, oid: i64, patch: Value) -> Result<Value>;
    async fn remove(&self, worker: &Worker, scheme: &str, oid: i64) -> Result<bool>;
    async fn count(&self, worker: &Worker, list: &QueryList) -> Result<i64>;

    async fn field_get(&self, worker: &Worker, scheme: &str, target: FieldTarget<'_>, field: &str) -> Result<Value>;
    async fn field_set(&self, worker: &Worker, scheme: &str, target: FieldTarget<'_>, field: &str, data: Value) -> Result<Value>;
    async fn field_append(&self, worker: &Worker, scheme: &str, target: FieldTarget<'_>, field: &str, data: Value) -> Result<Value>;
    /// Reference-Set cleanup: `keep_ids` is an inclusion filter — rows
    /// whose target id is not in `keep_ids` are unlinked. `None` clears
    /// the whole field. (Resolves the source's ambiguous cleanup-with-
    /// ids semantics; see DESIGN.md.)
    async fn field_clear(&self, worker: &Worker, scheme: &str, target: FieldTarget<'_>, field: &str, keep_ids: Option<&[i64]>) -> Result<Value>;

    async fn add_to_view(&self, worker: &Worker, scheme: &str, oid: i64, view_field: &str, target_oid: i64) -> Result<bool>;
    async fn remove_from_view(&self, worker: &Worker, scheme: &str, oid: i64, view_field: &str, target_oid: i64) -> Result<bool>;

    async fn get_reference_parents(&self, worker: &Worker, scheme: &str, oid: i64, foreign_scheme: &str, field: &str) -> Result<Vec<i64>>;

    async fn perform_query_list(&self, worker: &Worker, list: &QueryList, count: Option<u32>, for_update: bool, field: Option<&str>) -> Result<Value>;
    async fn perform_query_list_for_ids(&self, worker: &Worker, list: &QueryList, count: Option<u32>) -> Result<Vec<i64>>;

    async fn get_delta_value(&self, worker: &Worker, scheme: &str) -> Result<i64>;
    async fn get_delta_value_view(&self, worker: &Worker, scheme: &str, view: &str, oid: i64) -> Result<i64>;

    async fn authorize_user(&self, worker: &Worker, auth: &Auth<'_>, name: &str, password: &str) -> Result<Option<User>>;

    async fn broadcast(&self, payload: Value) -> Result<()>;

    async fn begin(&self) -> Result<()>;
    async fn commit(&self) -> Result<()>;
    async fn cancel(&self) -> Result<()>;

    async fn kv_set(&self, key: &str, value: Value, ttl_secs: Option<u64>) -> Result<()>;
    async fn kv_get(&self, key: &str) -> Result<Option<Value>>;
    async fn kv_clear(&self, key: &str) -> Result<()>;
}

/// Helper for adapter implementations: maps a transaction-broken
/// condition to the Resource Family's expected abort error.
pub fn transaction_broken() -> Error {
    Error::Internal("adapter reported a broken transaction".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingAdapter {
        begins: AtomicUsize,
        commits: AtomicUsize,
        cancels: AtomicUsize,
    }

    #[async_trait]
    impl StorageAdapter for CountingAdapter {
        async fn select(&self, _w: &Worker, _l: &QueryList) -> Result<Value> { Ok(Value::Null) }
        async fn create(&self, _w: &Worker, _s: &str, _v: Value) -> Result<Value> { Ok(Value::Null) }
        async fn save(&self, _w: &Worker, _s: &str, _o: i64, _v: Value, _f: &[String]) -> Result<Value> { Ok(Value::Null) }
        async fn patch(&self, _w: &Worker, _s: &str, _o: i64, _p: Value) -> Result<Value> { Ok(Value::Null) }
        async fn remove(&self, _w: &Worker, _s: &str, _o: i64) -> Result<bool> { Ok(true) }
        async fn count(&self, _w: &Worker, _l: &QueryList) -> Result<i64> { Ok(0) }
        async fn field_get(&self, _w: &Worker, _s: &str, _t: FieldTarget<'_>, _f: &str) -> Result<Value> { Ok(Value::Null) }
        async fn field_set(&self, _w: &Worker, _s: &str, _t: FieldTarget<'_>, _f: &str, _d: Value) -> Result<Value> { Ok(Value::Null) }
        async fn field_append(&self, _w: &Worker, _s: &str, _t: FieldTarget<'_>, _f: &str, _d: Value) -> Result<Value> { Ok(Value::Null) }
        async fn field_clear(&self, _w: &Worker, _s: &str, _t: FieldTarget<'_>, _f: &str, _k: Option<&[i64]>) -> Result<Value> { Ok(Value::Null) }
        async fn add_to_view(&self, _w: &Worker, _s: &str, _o: i64, _vf: &str, _t: i64) -> Result<bool> { Ok(true) }
        async fn remove_from_view(&self, _w: &Worker, _s: &str, _o: i64, _vf: &str, _t: i64) -> Result<bool> { Ok(true) }
        async fn get_reference_parents(&self, _w: &Worker, _s: &str, _o: i64, _fs: &str, _f: &str) -> Result<Vec<i64>> { Ok(vec![]) }
        async fn perform_query_list(&self, _w: &Worker, _l: &QueryList, _c: Option<u32>, _fu: bool, _f: Option<&str>) -> Result<Value> { Ok(Value::Null) }
        async fn perform_query_list_for_ids(&self, _w: &Worker, _l: &QueryList, _c: Option<u32>) -> Result<Vec<i64>> { Ok(vec![]) }
        async fn get_delta_value(&self, _w: &Worker, _s: &str) -> Result<i64> { Ok(0) }
        async fn get_delta_value_view(&self, _w: &Worker, _s: &str, _v: &str, _o: i64) -> Result<i64> { Ok(0) }
        async fn authorize_user(&self, _w: &Worker, _a: &Auth<'_>, _n: &str, _p: &str) -> Result<Option<User>> { Ok(None) }
        async fn broadcast(&self, _p: Value) -> Result<()> { Ok(()) }
        async fn begin(&self) -> Result<()> { self.begins.fetch_add(1, Ordering::SeqCst); Ok(()) }
        async fn commit(&self) -> Result<()> { self.commits.fetch_add(1, Ordering::SeqCst); Ok(()) }
        async fn cancel(&self) -> Result<()> { self.cancels.fetch_add(1, Ordering::SeqCst); Ok(()) }
        async fn kv_set(&self, _k: &str, _v: Value, _t: Option<u64>) -> Result<()> { Ok(()) }
        async fn kv_get(&self, _k: &str) -> Result<Option<Value>> { Ok(None) }
        async fn kv_clear(&self, _k: &str) -> Result<()> { Ok(()) }
    }

    #[tokio::test]
    async fn nested_perform_does_not_rebegin_and_outer_commits() {
        let adapter = CountingAdapter { begins: AtomicUsize::new(0), commits: AtomicUsize::new(0), cancels: AtomicUsize::new(0) };
        let worker = Worker::new("public");

        let result: Result<()> = worker
            .perform_in_transaction(&adapter, || async {
                worker
                    .perform_in_transaction(&adapter, || async { Ok::<_, Error>(()) })
                    .await
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(adapter.begins.load(Ordering::SeqCst), 1);
        assert_eq!(adapter.commits.load(Ordering::SeqCst), 1);
        assert_eq!(adapter.cancels.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn nested_failure_marks_rollback_only_and_outer_cancels() {
        let adapter = CountingAdapter { begins: AtomicUsize::new(0), commits: AtomicUsize::new(0), cancels: AtomicUsize::new(0) };
        let worker = Worker::new("public");

        let result: Result<()> = worker
            .perform_in_transaction(&adapter, || async {
                let inner: Result<()> = worker
                    .perform_in_transaction(&adapter, || async { Err(Error::Internal("boom".into())) })
                    .await;
                assert!(inner.is_err());
                Ok(())
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(adapter.cancels.load(Ordering::SeqCst), 1);
        assert_eq!(adapter.commits.load(Ordering::SeqCst), 0);
    }
}
