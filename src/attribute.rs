//! Attribute values of one cluster instance.
//!
//! Every declared attribute owns its own slot; unrelated attributes never contend.
//! Commits are queued in revision order and delivered to subscribers without any lock
//! held, so each subscriber observes changes as unbroken chain `old(n) == new(n-1)` even
//! when writers race, and subscriber may write the attribute it watches. Writer that finds
//! delivery already running returns at once; running deliverer also hands out its change.

use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{Error, Result};
use crate::messages::StatusCode;
use crate::schema::{self, Schema, Value};
use crate::session::InvocationContext;
use crate::tlv::DEFAULT_MAX_DEPTH;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    ReadWrite,
}

/// Value restriction checked on top of schema conformance
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// inclusive numeric range
    Range { min: i64, max: i64 },
    /// max length of string/octet string in bytes, or max number of list items
    MaxLength(usize),
}

impl Constraint {
    /// Null always passes, nullability is checked by schema.
    pub fn check(&self, value: &Value) -> Result<()> {
        match (self, value) {
            (_, Value::Null) => Ok(()),
            (Constraint::Range { min, max }, Value::Int(_) | Value::UInt(_)) => {
                let n = match value {
                    Value::Int(i) => *i as i128,
                    Value::UInt(u) => *u as i128,
                    _ => 0,
                };
                if n < *min as i128 || n > *max as i128 {
                    return Err(Error::ConstraintViolation(format!(
                        "{} outside of {}..={}",
                        n, min, max
                    )));
                }
                Ok(())
            }
            (Constraint::MaxLength(max), v) => {
                let len = match v {
                    Value::Utf8(s) => s.len(),
                    Value::Bytes(b) => b.len(),
                    Value::List(l) => l.len(),
                    _ => {
                        return Err(Error::ConstraintViolation(
                            "length of non sequence value".into(),
                        ))
                    }
                };
                if len > *max {
                    return Err(Error::ConstraintViolation(format!("length {} over {}", len, max)));
                }
                Ok(())
            }
            (Constraint::Range { .. }, _) => {
                Err(Error::ConstraintViolation("range of non numeric value".into()))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttributeDef {
    pub id: u32,
    pub name: &'static str,
    pub schema: Schema,
    /// value reported until first write
    pub default: Value,
    pub access: Access,
    pub constraint: Option<Constraint>,
}

impl AttributeDef {
    /// Read only attribute with default derived from schema
    pub fn new(id: u32, name: &'static str, schema: Schema) -> Self {
        Self {
            id,
            name,
            default: schema.default_value(),
            schema,
            access: Access::Read,
            constraint: None,
        }
    }

    pub fn writable(mut self) -> Self {
        self.access = Access::ReadWrite;
        self
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = default.into();
        self
    }

    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraint = Some(constraint);
        self
    }

    /// Schema must be consistent and default must conform to schema and constraint.
    pub fn validate(&self) -> Result<()> {
        self.schema.validate()?;
        schema::encode(&self.schema, &self.default).map_err(|e| {
            Error::EncodingInvariantViolation(format!("default of {}: {}", self.name, e))
        })?;
        if let Some(c) = &self.constraint {
            c.check(&self.default).map_err(|e| {
                Error::EncodingInvariantViolation(format!("default of {}: {}", self.name, e))
            })?;
        }
        Ok(())
    }

    fn check(&self, value: &Value) -> Result<()> {
        match &self.constraint {
            Some(c) => c.check(value),
            None => Ok(()),
        }
    }
}

/// Change passed to subscribers
#[derive(Debug)]
pub struct AttributeChange<'a> {
    pub attribute_id: u32,
    /// revision after the change
    pub revision: u64,
    pub old: &'a Value,
    pub new: &'a Value,
}

pub type Subscriber = Arc<dyn Fn(&AttributeChange) -> anyhow::Result<()> + Send + Sync>;

struct State {
    value: Value,
    revision: u64,
}

struct Notice {
    revision: u64,
    old: Value,
    new: Value,
}

#[derive(Default)]
struct Delivery {
    queue: VecDeque<Notice>,
    running: bool,
}

struct Slot {
    def: AttributeDef,
    state: Mutex<State>,
    subscribers: Mutex<Vec<Subscriber>>,
    /// committed changes not yet handed to subscribers; locked only after `state`
    delivery: Mutex<Delivery>,
}

impl Slot {
    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn delivery(&self) -> std::sync::MutexGuard<'_, Delivery> {
        self.delivery.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct AttributeStore {
    slots: HashMap<u32, Slot>,
    max_depth: usize,
}

impl std::fmt::Debug for AttributeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttributeStore")
            .field("attributes", &self.ids())
            .field("max_depth", &self.max_depth)
            .finish()
    }
}

impl AttributeStore {
    /// Store over fixed set of attributes. Duplicate ids and invalid definitions are rejected.
    pub fn new(defs: Vec<AttributeDef>) -> Result<Self> {
        let mut slots = HashMap::new();
        for def in defs {
            def.validate()?;
            if slots.contains_key(&def.id) {
                return Err(Error::EncodingInvariantViolation(format!(
                    "attribute {:#x} ({}) declared twice",
                    def.id, def.name
                )));
            }
            let slot = Slot {
                state: Mutex::new(State {
                    value: def.default.clone(),
                    revision: 0,
                }),
                subscribers: Mutex::new(Vec::new()),
                delivery: Mutex::new(Delivery::default()),
                def,
            };
            slots.insert(slot.def.id, slot);
        }
        Ok(Self {
            slots,
            max_depth: DEFAULT_MAX_DEPTH,
        })
    }

    /// Limit nesting accepted in written values
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Declared attribute ids in ascending order
    pub fn ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.slots.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn definition(&self, id: u32) -> Option<&AttributeDef> {
        self.slots.get(&id).map(|s| &s.def)
    }

    /// Current value; None only for undeclared attribute
    pub fn read(&self, id: u32) -> Option<Value> {
        self.slots.get(&id).map(|s| s.state().value.clone())
    }

    pub fn revision(&self, id: u32) -> Option<u64> {
        self.slots.get(&id).map(|s| s.state().revision)
    }

    /// Revision as reported on the wire (low 32 bits, wraps).
    ///
    /// Version is kept per attribute, not per cluster instance as Matter defines DataVersion.
    /// It is strictly finer: any change of the attribute moves it, so a peer guarding a write
    /// with it never misses a change, while writes of sibling attributes do not invalidate it.
    pub fn data_version(&self, id: u32) -> Option<u32> {
        self.revision(id).map(|r| r as u32)
    }

    /// Value together with revision it belongs to
    pub fn snapshot(&self, id: u32) -> Option<(Value, u64)> {
        self.slots.get(&id).map(|s| {
            let st = s.state();
            (st.value.clone(), st.revision)
        })
    }

    /// Write from peer
    pub fn write(&self, id: u32, raw: &[u8], ctx: &InvocationContext) -> StatusCode {
        self.write_versioned(id, raw, ctx, None)
    }

    /// Write from peer guarded by data version. When `data_version` is present and differs
    /// from current one, nothing is written.
    pub fn write_versioned(
        &self,
        id: u32,
        raw: &[u8],
        ctx: &InvocationContext,
        data_version: Option<u32>,
    ) -> StatusCode {
        let slot = match self.slots.get(&id) {
            Some(s) => s,
            None => return StatusCode::UnsupportedAttribute,
        };
        if slot.def.access != Access::ReadWrite {
            log::debug!(
                "exch:{} node {:x} write to read only attribute {}",
                ctx.exchange_id,
                ctx.source_node_id,
                slot.def.name
            );
            return StatusCode::UnsupportedWrite;
        }
        let value = match schema::decode_with_depth(&slot.def.schema, raw, self.max_depth)
            .and_then(|v| slot.def.check(&v).map(|_| v))
        {
            Ok(v) => v,
            Err(e) => {
                log::debug!(
                    "exch:{} rejected write of {} data {}: {}",
                    ctx.exchange_id,
                    slot.def.name,
                    hex::encode(raw),
                    e
                );
                return write_error_status(&e);
            }
        };
        match commit(slot, value, data_version) {
            Some(revision) => {
                log::debug!(
                    "exch:{} node {:x} wrote {} revision {}",
                    ctx.exchange_id,
                    ctx.source_node_id,
                    slot.def.name,
                    revision
                );
                StatusCode::Success
            }
            None => StatusCode::DataVersionMismatch,
        }
    }

    /// Local write by server side code. Access mode is not checked. Returns new revision.
    pub fn set(&self, id: u32, value: impl Into<Value>) -> Result<u64> {
        let slot = self
            .slots
            .get(&id)
            .ok_or_else(|| Error::status(StatusCode::UnsupportedAttribute))?;
        let value = value.into();
        schema::encode(&slot.def.schema, &value)?;
        slot.def.check(&value)?;
        commit(slot, value, None).ok_or_else(Error::failure)
    }

    /// Register callback invoked after every committed change of attribute
    pub fn subscribe<F>(&self, id: u32, f: F) -> Result<()>
    where
        F: Fn(&AttributeChange) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let slot = self
            .slots
            .get(&id)
            .ok_or_else(|| Error::status(StatusCode::UnsupportedAttribute))?;
        slot.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(f));
        Ok(())
    }
}

fn write_error_status(e: &Error) -> StatusCode {
    match e {
        Error::MalformedInput(_) => StatusCode::InvalidAction,
        e if e.is_out_of_range() => StatusCode::ConstraintError,
        Error::SchemaMismatch(_) => StatusCode::InvalidDataType,
        Error::ConstraintViolation(_) => StatusCode::ConstraintError,
        _ => StatusCode::Failure,
    }
}

/// Store value and notify subscribers. None when data version does not match.
fn commit(slot: &Slot, value: Value, data_version: Option<u32>) -> Option<u64> {
    let revision = {
        let mut st = slot.state();
        if let Some(dv) = data_version {
            if st.revision as u32 != dv {
                log::debug!(
                    "{} data version {} does not match {}",
                    slot.def.name,
                    dv,
                    st.revision as u32
                );
                return None;
            }
        }
        st.revision += 1;
        let old = std::mem::replace(&mut st.value, value.clone());
        // queued while state is held, queue order is revision order
        slot.delivery().queue.push_back(Notice {
            revision: st.revision,
            old,
            new: value,
        });
        st.revision
    };
    deliver(slot);
    Some(revision)
}

/// Hand queued changes to subscribers unless another call is already doing it.
fn deliver(slot: &Slot) {
    {
        let mut d = slot.delivery();
        if d.running {
            return;
        }
        d.running = true;
    }
    loop {
        let notice = {
            let mut d = slot.delivery();
            match d.queue.pop_front() {
                Some(n) => n,
                None => {
                    d.running = false;
                    return;
                }
            }
        };
        let subscribers = slot
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let change = AttributeChange {
            attribute_id: slot.def.id,
            revision: notice.revision,
            old: &notice.old,
            new: &notice.new,
        };
        for s in subscribers {
            match std::panic::catch_unwind(AssertUnwindSafe(|| s(&change))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::warn!("subscriber of {} failed: {:?}", slot.def.name, e),
                Err(_) => log::warn!("subscriber of {} panicked", slot.def.name),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Field;
    use crate::session::{AuthMode, SessionIdentity};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const ON_OFF: u32 = 0x0000;
    const LEVEL: u32 = 0x4000;
    const LABEL: u32 = 0x0005;

    fn ctx() -> InvocationContext {
        InvocationContext::new(SessionIdentity::new(1, 1, AuthMode::Case), 0x1122, 1, 3)
    }

    fn store() -> AttributeStore {
        AttributeStore::new(vec![
            AttributeDef::new(ON_OFF, "OnOff", Schema::Bool),
            AttributeDef::new(LEVEL, "OnLevel", Schema::nullable(Schema::U8))
                .writable()
                .with_default(Value::Null)
                .with_constraint(Constraint::Range { min: 1, max: 254 }),
            AttributeDef::new(LABEL, "NodeLabel", Schema::Utf8)
                .writable()
                .with_constraint(Constraint::MaxLength(32)),
        ])
        .unwrap()
    }

    fn enc(schema: &Schema, v: impl Into<Value>) -> Vec<u8> {
        schema::encode(schema, &v.into()).unwrap()
    }

    #[test]
    fn defaults_before_first_write() {
        let s = store();
        assert_eq!(s.read(ON_OFF), Some(Value::Bool(false)));
        assert_eq!(s.read(LEVEL), Some(Value::Null));
        assert_eq!(s.read(LABEL), Some(Value::Utf8(String::new())));
        assert_eq!(s.revision(LEVEL), Some(0));
        assert_eq!(s.read(0x99), None);
        assert_eq!(s.ids(), vec![ON_OFF, LABEL, LEVEL]);
    }

    #[test]
    fn write_status_mapping() {
        let s = store();
        let c = ctx();
        assert_eq!(s.write(0x99, &enc(&Schema::Bool, true), &c), StatusCode::UnsupportedAttribute);
        assert_eq!(s.write(ON_OFF, &enc(&Schema::Bool, true), &c), StatusCode::UnsupportedWrite);
        assert_eq!(s.write(LEVEL, &[0x24], &c), StatusCode::InvalidAction);
        assert_eq!(s.write(LEVEL, &enc(&Schema::Utf8, "x"), &c), StatusCode::InvalidDataType);
        assert_eq!(s.write(LEVEL, &enc(&Schema::U16, 300u16), &c), StatusCode::ConstraintError);
        assert_eq!(s.write(LEVEL, &enc(&Schema::U8, 255u8), &c), StatusCode::ConstraintError);
        assert_eq!(
            s.write(LABEL, &enc(&Schema::Utf8, "a".repeat(33)), &c),
            StatusCode::ConstraintError
        );
        // nothing above was committed
        assert_eq!(s.revision(LEVEL), Some(0));
        assert_eq!(s.revision(LABEL), Some(0));

        assert_eq!(s.write(LEVEL, &enc(&Schema::U8, 200u8), &c), StatusCode::Success);
        assert_eq!(s.read(LEVEL), Some(Value::UInt(200)));
        assert_eq!(s.write(LEVEL, &[0x14], &c), StatusCode::Success);
        assert_eq!(s.read(LEVEL), Some(Value::Null));
        assert_eq!(s.revision(LEVEL), Some(2));
    }

    #[test]
    fn data_version_is_per_attribute() {
        let s = store();
        let c = ctx();
        let dv = s.data_version(LEVEL).unwrap();
        assert_eq!(s.write(LABEL, &enc(&Schema::Utf8, "hall"), &c), StatusCode::Success);
        assert_eq!(s.set(ON_OFF, true).unwrap(), 1);
        assert_eq!(s.data_version(LEVEL), Some(dv));
        assert_eq!(
            s.write_versioned(LEVEL, &enc(&Schema::U8, 9u8), &c, Some(dv)),
            StatusCode::Success
        );
        assert_eq!(s.data_version(LEVEL), Some(dv + 1));
    }

    #[test]
    fn data_version_guard() {
        let s = store();
        let c = ctx();
        let dv = s.data_version(LABEL).unwrap();
        assert_eq!(
            s.write_versioned(LABEL, &enc(&Schema::Utf8, "kitchen"), &c, Some(dv)),
            StatusCode::Success
        );
        assert_eq!(
            s.write_versioned(LABEL, &enc(&Schema::Utf8, "hall"), &c, Some(dv)),
            StatusCode::DataVersionMismatch
        );
        assert_eq!(s.snapshot(LABEL), Some((Value::Utf8("kitchen".into()), 1)));
    }

    #[test]
    fn local_set_bypasses_access_but_not_schema() {
        let s = store();
        assert_eq!(s.set(ON_OFF, true).unwrap(), 1);
        assert_eq!(s.read(ON_OFF), Some(Value::Bool(true)));
        assert!(matches!(s.set(ON_OFF, 1u8), Err(Error::EncodingInvariantViolation(_))));
        assert!(matches!(s.set(LEVEL, 0u8), Err(Error::ConstraintViolation(_))));
        assert!(matches!(
            s.set(0x99, true),
            Err(Error::HandlerFailure {
                status: Some(StatusCode::UnsupportedAttribute),
                ..
            })
        ));
        assert_eq!(s.revision(ON_OFF), Some(1));
    }

    #[test]
    fn invalid_definitions_rejected() {
        assert!(AttributeStore::new(vec![
            AttributeDef::new(1, "A", Schema::Bool),
            AttributeDef::new(1, "B", Schema::U8),
        ])
        .is_err());
        // default 0 is outside of range
        assert!(AttributeStore::new(vec![AttributeDef::new(1, "A", Schema::U8)
            .with_constraint(Constraint::Range { min: 1, max: 10 })])
        .is_err());
        assert!(AttributeStore::new(vec![AttributeDef::new(1, "A", Schema::U8).with_default("x")])
            .is_err());
        assert!(AttributeStore::new(vec![AttributeDef::new(
            1,
            "A",
            Schema::structure(vec![
                Field::new(0, "a", Schema::U8),
                Field::new(0, "b", Schema::U8)
            ])
        )])
        .is_err());
    }

    #[test]
    fn failing_subscribers_do_not_stop_others() {
        let s = store();
        let calls = Arc::new(AtomicUsize::new(0));
        s.subscribe(LABEL, |_c| anyhow::bail!("storage offline")).unwrap();
        s.subscribe(LABEL, |_c| panic!("subscriber bug")).unwrap();
        let n = calls.clone();
        s.subscribe(LABEL, move |c| {
            assert_eq!(c.new, &Value::Utf8("porch".into()));
            n.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
        assert!(s.subscribe(0x99, |_c| Ok(())).is_err());

        assert_eq!(s.write(LABEL, &enc(&Schema::Utf8, "porch"), &ctx()), StatusCode::Success);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(s.read(LABEL), Some(Value::Utf8("porch".into())));
    }

    #[test]
    fn out_of_width_write_is_constraint_error() {
        let s = AttributeStore::new(vec![AttributeDef::new(1, "Level", Schema::U8).writable()])
            .unwrap();
        let c = ctx();
        assert_eq!(s.write(1, &enc(&Schema::U16, 300u16), &c), StatusCode::ConstraintError);
        assert_eq!(s.write(1, &enc(&Schema::I8, Value::Int(-1)), &c), StatusCode::ConstraintError);
        assert_eq!(s.write(1, &enc(&Schema::Bool, true), &c), StatusCode::InvalidDataType);
        assert_eq!(s.revision(1), Some(0));
    }

    #[test]
    fn subscriber_may_write_its_own_attribute() {
        let s = Arc::new(
            AttributeStore::new(vec![AttributeDef::new(1, "Level", Schema::U8).writable()])
                .unwrap(),
        );
        let seen = Arc::new(Mutex::new(Vec::new()));
        let weak = Arc::downgrade(&s);
        let events = seen.clone();
        s.subscribe(1, move |c| {
            events.lock().unwrap().push((c.old.clone(), c.new.clone()));
            if c.new == &Value::UInt(5) {
                let s = weak.upgrade().unwrap();
                assert_eq!(s.set(1, 6u8)?, 2);
            }
            Ok(())
        })
        .unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        let writer = s.clone();
        std::thread::spawn(move || {
            let _ = tx.send(writer.set(1, 5u8).map_err(|e| e.to_string()));
        });
        let r = rx.recv_timeout(std::time::Duration::from_secs(2)).unwrap();
        assert_eq!(r, Ok(1));

        assert_eq!(s.snapshot(1), Some((Value::UInt(6), 2)));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (Value::UInt(0), Value::UInt(5)),
                (Value::UInt(5), Value::UInt(6)),
            ]
        );
    }

    #[test]
    fn concurrent_writes_form_chain() {
        let s = Arc::new(store());
        let seen: Vec<Arc<Mutex<Vec<(u64, Value, Value)>>>> =
            (0..2).map(|_| Arc::new(Mutex::new(Vec::new()))).collect();
        for events in &seen {
            let events = events.clone();
            s.subscribe(LEVEL, move |c| {
                events.lock().unwrap().push((c.revision, c.old.clone(), c.new.clone()));
                std::thread::sleep(std::time::Duration::from_millis(5));
                Ok(())
            })
            .unwrap();
        }
        let r = s.revision(LEVEL).unwrap();
        let barrier = Arc::new(std::sync::Barrier::new(2));
        let handles: Vec<_> = [10u8, 20u8]
            .into_iter()
            .map(|v| {
                let s = s.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    s.write(LEVEL, &enc(&Schema::U8, v), &ctx())
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), StatusCode::Success);
        }

        assert_eq!(s.revision(LEVEL), Some(r + 2));
        let last = s.read(LEVEL).unwrap();
        for events in &seen {
            let events = events.lock().unwrap();
            assert_eq!(events.len(), 2);
            let (r1, old1, new1) = &events[0];
            let (r2, old2, new2) = &events[1];
            assert_eq!((*r1, *r2), (r + 1, r + 2));
            assert_eq!(old1, &Value::Null);
            assert_eq!(old2, new1);
            assert_eq!(new2, &last);
            assert_ne!(new1, new2);
        }
        assert_eq!(*seen[0].lock().unwrap(), *seen[1].lock().unwrap());
    }
}
