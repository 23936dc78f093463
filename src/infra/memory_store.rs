//! In-process [`EntityStore`] over plain attribute rows.
//!
//! Rows are kept as JSON attribute maps keyed by id and materialized into
//! entities on read. Relationships are resolved by registered closures that
//! receive the owning row and return the related data.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, HashMap};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::application::pagination::{Paginated, ResolvedPage};
use crate::application::query::{Columns, Direction, Operator, OrderBy, Predicate, QueryState};
use crate::application::repos::{EntityStore, RepoError};
use crate::cache::lock::{rw_read, rw_write};
use crate::domain::entities::{Attributes, Entity, EntityId};
use crate::util::wildcard;

const SOURCE: &str = "infra::memory_store";
const ID_COLUMN: &str = "id";

type RelationResolver = Arc<dyn Fn(&Attributes) -> Value + Send + Sync>;
type Validator = Arc<dyn Fn(&Attributes) -> Result<(), String> + Send + Sync>;
type DeleteGuard = Arc<dyn Fn(&Attributes) -> bool + Send + Sync>;

pub struct InMemoryStore<E> {
    rows: RwLock<BTreeMap<EntityId, Attributes>>,
    next_id: AtomicI64,
    relations: HashMap<String, RelationResolver>,
    validator: Option<Validator>,
    delete_guard: Option<DeleteGuard>,
    unique: Vec<String>,
    reads: AtomicUsize,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Default for InMemoryStore<E> {
    fn default() -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
            relations: HashMap::new(),
            validator: None,
            delete_guard: None,
            unique: Vec::new(),
            reads: AtomicUsize::new(0),
            _entity: PhantomData,
        }
    }
}

impl<E> InMemoryStore<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a relationship that `with(name)` can eager-load.
    pub fn relation<F>(mut self, name: impl Into<String>, resolver: F) -> Self
    where
        F: Fn(&Attributes) -> Value + Send + Sync + 'static,
    {
        self.relations.insert(name.into(), Arc::new(resolver));
        self
    }

    /// Reject creates and updates whose resulting row fails `check`.
    pub fn validator<F>(mut self, check: F) -> Self
    where
        F: Fn(&Attributes) -> Result<(), String> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(check));
        self
    }

    /// Rows for which `allow` returns false are kept and reported as not
    /// deleted.
    pub fn delete_guard<F>(mut self, allow: F) -> Self
    where
        F: Fn(&Attributes) -> bool + Send + Sync + 'static,
    {
        self.delete_guard = Some(Arc::new(allow));
        self
    }

    pub fn unique(mut self, column: impl Into<String>) -> Self {
        self.unique.push(column.into());
        self
    }

    /// Number of read queries served so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        rw_read(&self.rows, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert a row directly, bypassing validation. Returns its id.
    pub fn insert_row(&self, mut attributes: Attributes) -> EntityId {
        let id = EntityId(self.next_id.fetch_add(1, Ordering::Relaxed));
        attributes.insert(ID_COLUMN.to_string(), Value::from(id.get()));
        rw_write(&self.rows, SOURCE, "insert_row").insert(id, attributes);
        id
    }

    fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    fn check(&self, row: &Attributes) -> Result<(), RepoError> {
        match &self.validator {
            Some(validator) => validator(row).map_err(RepoError::validation),
            None => Ok(()),
        }
    }

    fn check_unique(
        &self,
        rows: &BTreeMap<EntityId, Attributes>,
        row: &Attributes,
        own_id: Option<EntityId>,
    ) -> Result<(), RepoError> {
        for column in &self.unique {
            let Some(value) = row.get(column) else {
                continue;
            };
            let clash = rows
                .iter()
                .filter(|(id, _)| Some(**id) != own_id)
                .any(|(_, other)| other.get(column).is_some_and(|v| values_equal(v, value)));
            if clash {
                return Err(RepoError::Duplicate {
                    constraint: column.clone(),
                });
            }
        }
        Ok(())
    }

    /// Rows matching every predicate, in query order.
    fn select(&self, predicates: &[Predicate], query: &QueryState) -> Vec<Attributes> {
        let rows = rw_read(&self.rows, SOURCE, "select");
        let mut matched: Vec<Attributes> = rows
            .values()
            .filter(|row| predicates.iter().all(|predicate| evaluate(predicate, row)))
            .cloned()
            .collect();
        drop(rows);
        sort_rows(&mut matched, query.ordering());
        matched
    }
}

impl<E: Entity> InMemoryStore<E> {
    fn materialize(
        &self,
        row: &Attributes,
        columns: &Columns,
        query: &QueryState,
    ) -> Result<E, RepoError> {
        let mut shaped = if columns.is_all() {
            row.clone()
        } else {
            let mut projected = Attributes::new();
            if let Some(id) = row.get(ID_COLUMN) {
                projected.insert(ID_COLUMN.to_string(), id.clone());
            }
            for column in columns.iter() {
                projected.insert(
                    column.to_string(),
                    row.get(column).cloned().unwrap_or(Value::Null),
                );
            }
            projected
        };

        for name in query.relations() {
            let resolver = self.relations.get(name).ok_or_else(|| {
                RepoError::invalid_input(format!("undefined relationship `{name}`"))
            })?;
            shaped.insert(name.clone(), resolver(row));
        }

        serde_json::from_value(Value::Object(shaped)).map_err(RepoError::from_persistence)
    }

    fn materialize_all(
        &self,
        rows: &[Attributes],
        columns: &Columns,
        query: &QueryState,
    ) -> Result<Vec<E>, RepoError> {
        rows.iter()
            .map(|row| self.materialize(row, columns, query))
            .collect()
    }

    fn row_of(&self, entity: &E) -> Option<Attributes> {
        rw_read(&self.rows, SOURCE, "row_of")
            .get(&entity.id())
            .cloned()
    }
}

#[async_trait]
impl<E: Entity> EntityStore<E> for InMemoryStore<E> {
    async fn find(
        &self,
        id: EntityId,
        columns: &Columns,
        query: &QueryState,
    ) -> Result<Option<E>, RepoError> {
        self.record_read();
        let row = rw_read(&self.rows, SOURCE, "find").get(&id).cloned();
        row.map(|row| self.materialize(&row, columns, query))
            .transpose()
    }

    async fn first(
        &self,
        predicates: &[Predicate],
        columns: &Columns,
        query: &QueryState,
    ) -> Result<Option<E>, RepoError> {
        self.record_read();
        self.select(predicates, query)
            .first()
            .map(|row| self.materialize(row, columns, query))
            .transpose()
    }

    async fn list(
        &self,
        predicates: &[Predicate],
        columns: &Columns,
        query: &QueryState,
    ) -> Result<Vec<E>, RepoError> {
        self.record_read();
        let rows = self.select(predicates, query);
        self.materialize_all(&rows, columns, query)
    }

    async fn pluck(&self, column: &str, query: &QueryState) -> Result<Vec<Value>, RepoError> {
        self.record_read();
        Ok(self
            .select(&[], query)
            .into_iter()
            .map(|mut row| row.remove(column).unwrap_or(Value::Null))
            .collect())
    }

    async fn pluck_keyed(
        &self,
        value_column: &str,
        key_column: &str,
        query: &QueryState,
    ) -> Result<BTreeMap<String, Value>, RepoError> {
        self.record_read();
        Ok(self
            .select(&[], query)
            .into_iter()
            .map(|row| {
                let key = match row.get(key_column) {
                    Some(Value::String(text)) => text.clone(),
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                (key, row.get(value_column).cloned().unwrap_or(Value::Null))
            })
            .collect())
    }

    async fn paginate(
        &self,
        page: &ResolvedPage,
        columns: &Columns,
        query: &QueryState,
    ) -> Result<Paginated<E>, RepoError> {
        self.record_read();
        let rows = self.select(&[], query);
        let total = rows.len() as u64;
        let window: Vec<Attributes> = rows
            .into_iter()
            .skip(page.offset())
            .take(page.per_page as usize)
            .collect();
        let items = self.materialize_all(&window, columns, query)?;
        Ok(Paginated::new(items, total, page))
    }

    async fn create(&self, mut attributes: Attributes) -> Result<E, RepoError> {
        attributes.remove(ID_COLUMN);
        self.check(&attributes)?;

        let mut rows = rw_write(&self.rows, SOURCE, "create");
        self.check_unique(&rows, &attributes, None)?;
        let id = EntityId(self.next_id.fetch_add(1, Ordering::Relaxed));
        attributes.insert(ID_COLUMN.to_string(), Value::from(id.get()));
        rows.insert(id, attributes.clone());
        drop(rows);

        debug!(id = %id, "Row created");
        self.materialize(&attributes, &Columns::all(), &QueryState::default())
    }

    async fn update(&self, entity: &E, attributes: Attributes) -> Result<E, RepoError> {
        let id = entity.id();
        let mut rows = rw_write(&self.rows, SOURCE, "update");
        let mut merged = rows.get(&id).cloned().ok_or(RepoError::NotFound)?;
        for (column, value) in attributes {
            if column != ID_COLUMN {
                merged.insert(column, value);
            }
        }
        self.check(&merged)?;
        self.check_unique(&rows, &merged, Some(id))?;
        rows.insert(id, merged.clone());
        drop(rows);

        debug!(id = %id, "Row updated");
        self.materialize(&merged, &Columns::all(), &QueryState::default())
    }

    async fn delete(&self, entity: &E) -> Result<bool, RepoError> {
        let Some(row) = self.row_of(entity) else {
            return Ok(false);
        };
        if let Some(guard) = &self.delete_guard {
            if !guard(&row) {
                return Ok(false);
            }
        }
        let removed = rw_write(&self.rows, SOURCE, "delete")
            .remove(&entity.id())
            .is_some();
        if removed {
            debug!(id = %entity.id(), "Row deleted");
        }
        Ok(removed)
    }
}

fn evaluate(predicate: &Predicate, row: &Attributes) -> bool {
    let field = |attribute: &str| row.get(attribute).unwrap_or(&Value::Null);
    match predicate {
        Predicate::Compare {
            attribute,
            operator,
            value,
        } => compare(field(attribute), *operator, value),
        Predicate::In { attribute, values } => {
            let current = field(attribute);
            values.iter().any(|value| values_equal(current, value))
        }
        Predicate::NotIn { attribute, values } => {
            let current = field(attribute);
            !values.iter().any(|value| values_equal(current, value))
        }
        Predicate::Between {
            attribute,
            low,
            high,
        } => {
            let current = field(attribute);
            matches!(
                order_values(current, low),
                Some(CmpOrdering::Greater | CmpOrdering::Equal)
            ) && matches!(
                order_values(current, high),
                Some(CmpOrdering::Less | CmpOrdering::Equal)
            )
        }
    }
}

fn compare(current: &Value, operator: Operator, expected: &Value) -> bool {
    match operator {
        Operator::Eq => values_equal(current, expected),
        Operator::Ne => !values_equal(current, expected),
        Operator::Lt => order_values(current, expected) == Some(CmpOrdering::Less),
        Operator::Le => matches!(
            order_values(current, expected),
            Some(CmpOrdering::Less | CmpOrdering::Equal)
        ),
        Operator::Gt => order_values(current, expected) == Some(CmpOrdering::Greater),
        Operator::Ge => matches!(
            order_values(current, expected),
            Some(CmpOrdering::Greater | CmpOrdering::Equal)
        ),
        Operator::Like => match (current, expected) {
            (Value::String(text), Value::String(pattern)) => {
                wildcard::matches(&pattern.to_lowercase(), &text.to_lowercase(), '%')
            }
            _ => false,
        },
    }
}

/// Equality with `1` and `1.0` treated as the same number.
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        },
        _ => left == right,
    }
}

/// Ordering between comparable values; `None` across kinds.
fn order_values(left: &Value, right: &Value) -> Option<CmpOrdering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Null, Value::Null) => Some(CmpOrdering::Equal),
        _ => None,
    }
}

/// Sort rank used when ordering rows; nulls sort first.
fn sort_key_cmp(left: &Value, right: &Value) -> CmpOrdering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }
    order_values(left, right).unwrap_or_else(|| rank(left).cmp(&rank(right)))
}

fn sort_rows(rows: &mut [Attributes], ordering: &[OrderBy]) {
    if ordering.is_empty() {
        return;
    }
    rows.sort_by(|left, right| {
        for clause in ordering {
            let a = left.get(&clause.column).unwrap_or(&Value::Null);
            let b = right.get(&clause.column).unwrap_or(&Value::Null);
            let ord = match clause.direction {
                Direction::Asc => sort_key_cmp(a, b),
                Direction::Desc => sort_key_cmp(b, a),
            };
            if ord != CmpOrdering::Equal {
                return ord;
            }
        }
        CmpOrdering::Equal
    });
}
