//! The host-function surface injected into a sandboxed VM: `read_message`,
//! `decode_message`, `encode_message`, `inject_message`, `inject_payload`,
//! and `update_checkpoint`. Grounded in `heka_sandbox/sandbox.c`'s
//! `read_message`/`inject_message_input`/`inject_message_analysis`/
//! `inject_payload`/`update_checkpoint` C functions, reworked as `mlua`
//! closures over a shared, `Rc<RefCell<..>>`-guarded message/output queue
//! instead of a `void*` upvalue.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use heka_wire::{FieldValue, FindResult, InputBuffer, Message};
use mlua::{Lua, Table, UserData, UserDataMethods, Value, Variadic};

use crate::table_codec;

/// Bounds a [`StreamReader`]'s internal buffer. spec.md's Plugin Config
/// table has no equivalent of the C source's `LSB_HEKA_MAX_MESSAGE_SIZE`
/// registry entry, so this is a fixed local ceiling rather than a
/// per-plugin config surface.
const STREAM_READER_MAX_MESSAGE_SIZE: usize = 1024 * 1024 * 64;

/// One message queued by `inject_message`/`inject_payload`, waiting for the
/// plugin shell to drain it after `process_message`/`timer_event` returns.
#[derive(Debug, Clone)]
pub struct Injected {
    pub bytes: Vec<u8>,
    pub checkpoint_numeric: Option<f64>,
    pub checkpoint_string: Option<String>,
}

/// A checkpoint update requested by the output role's `update_checkpoint`.
#[derive(Debug, Clone, Default)]
pub struct CheckpointUpdate {
    pub numeric: Option<f64>,
    /// The optional `failures` count from `update_checkpoint(sequence_id [,
    /// failures])`, e.g. how many messages since the last checkpoint the
    /// plugin failed to deliver.
    pub failures: Option<f64>,
}

/// State shared between the host closures and the owning [`crate::Plugin`].
#[derive(Default)]
pub struct Shared {
    pub current_message: RefCell<Option<Vec<u8>>>,
    pub injected: RefCell<Vec<Injected>>,
    pub checkpoints: RefCell<Vec<CheckpointUpdate>>,
    pub logger_name: RefCell<String>,
    pub hostname: RefCell<String>,
    /// `output_limit` from the sandbox's quota config; every table encode
    /// that produces more bytes than this is rejected, mirroring
    /// `heka_encode_message_table`'s `exceeded output_limit` error.
    pub output_limit: Cell<usize>,
    pub output_current: Cell<u64>,
    pub output_max: Cell<u64>,
    /// Backs the input role's `is_running()` synchronization barrier.
    /// Defaults to `true`; the plugin shell flips it to `false` to signal a
    /// clean shutdown is in progress.
    pub running: Cell<bool>,
}

impl Shared {
    /// Checks an about-to-be-emitted encoded message against
    /// `output_limit`, updating the current/high-water-mark readings
    /// [`crate::Core::usage`] reports for [`heka_sandbox::UsageType::Output`].
    fn charge_output(&self, len: usize) -> mlua::Result<()> {
        let limit = self.output_limit.get();
        if limit != 0 && len > limit {
            return Err(mlua::Error::RuntimeError("exceeded output_limit".to_string()));
        }
        self.output_current.set(len as u64);
        if len as u64 > self.output_max.get() {
            self.output_max.set(len as u64);
        }
        Ok(())
    }

    /// Fills `Logger`/`Hostname` on `table` from the plugin's configured
    /// defaults, but only where the script didn't already set one itself.
    fn fill_defaults(&self, table: &Table) -> mlua::Result<()> {
        if table.get::<Option<String>>("Logger")?.is_none() {
            table.set("Logger", self.logger_name.borrow().clone())?;
        }
        if table.get::<Option<String>>("Hostname")?.is_none() {
            table.set("Hostname", self.hostname.borrow().clone())?;
        }
        Ok(())
    }
}

fn field_value_to_lua(lua: &Lua, v: FieldValue<'_>) -> mlua::Result<Value> {
    Ok(match v {
        FieldValue::Nil => Value::Nil,
        FieldValue::String(s) => Value::String(lua.create_string(s)?),
        FieldValue::Numeric(n) => Value::Number(n),
        FieldValue::Bool(b) => Value::Boolean(b),
    })
}

/// Parses the `read_message` name argument: `"Fields[name]"` addresses a
/// field, anything else addresses a header.
enum Target {
    Header(&'static str),
    Field(String),
}

fn parse_target(name: &str) -> Option<Target> {
    if let Some(inner) = name.strip_prefix("Fields[").and_then(|s| s.strip_suffix(']')) {
        return Some(Target::Field(inner.to_string()));
    }
    for header in ["Uuid", "Timestamp", "Type", "Logger", "Severity", "Payload", "EnvVersion", "Pid", "Hostname", "raw"] {
        if name == header {
            return Some(Target::Header(header));
        }
    }
    None
}

/// Shared implementation behind the global `read_message` and a
/// [`StreamReader`]'s own `read_message` method: addresses a header or
/// `Fields[name]` entry against a decoded message's raw bytes.
fn read_message_against(lua: &Lua, bytes: &[u8], name: &str, field_index: Option<i64>, array_index: Option<i64>) -> mlua::Result<Value> {
    let msg = Message::decode(bytes).map_err(|e| mlua::Error::RuntimeError(e.to_string()))?;
    let Some(target) = parse_target(name) else {
        return Ok(Value::Nil);
    };
    match target {
        Target::Header("raw") => Ok(Value::String(lua.create_string(bytes)?)),
        Target::Header("Uuid") => Ok(Value::String(lua.create_string(msg.uuid)?)),
        Target::Header("Timestamp") => Ok(Value::Integer(msg.timestamp)),
        Target::Header("Type") => opt_str(lua, msg.r#type),
        Target::Header("Logger") => opt_str(lua, msg.logger),
        Target::Header("Severity") => Ok(Value::Integer(msg.severity as i64)),
        Target::Header("Payload") => opt_str(lua, msg.payload),
        Target::Header("EnvVersion") => opt_str(lua, msg.env_version),
        Target::Header("Pid") => Ok(Value::Integer(msg.pid as i64)),
        Target::Header("Hostname") => opt_str(lua, msg.hostname),
        Target::Header(_) => Ok(Value::Nil),
        Target::Field(field_name) => {
            let fi = field_index.unwrap_or(0).max(0) as usize;
            let ai = array_index.unwrap_or(0).max(0) as usize;
            field_value_to_lua(lua, msg.read_field(field_name.as_bytes(), fi, ai))
        }
    }
}

fn register_read_message(lua: &Lua, shared: &Rc<Shared>) -> mlua::Result<()> {
    let shared = Rc::clone(shared);
    let f = lua.create_function(move |lua, (name, field_index, array_index): (String, Option<i64>, Option<i64>)| {
        let current = shared.current_message.borrow();
        let Some(bytes) = current.as_deref() else {
            return Ok(Value::Nil);
        };
        read_message_against(lua, bytes, &name, field_index, array_index)
    })?;
    lua.globals().set("read_message", f)
}

fn opt_str(lua: &Lua, v: Option<&[u8]>) -> mlua::Result<Value> {
    match v {
        Some(s) => Ok(Value::String(lua.create_string(s)?)),
        None => Ok(Value::Nil),
    }
}

fn register_decode_message(lua: &Lua) -> mlua::Result<()> {
    let f = lua.create_function(|lua, raw: mlua::String| {
        let bytes = raw.as_bytes();
        let msg = Message::decode(&bytes).map_err(|e| mlua::Error::RuntimeError(e.to_string()))?;
        table_codec::message_to_table(lua, &msg)
    })?;
    lua.globals().set("decode_message", f)
}

fn register_encode_message(lua: &Lua, shared: &Rc<Shared>) -> mlua::Result<()> {
    let shared = Rc::clone(shared);
    let f = lua.create_function(move |lua, table: Table| {
        shared.fill_defaults(&table)?;
        let bytes = table_codec::encode_table(&table)?;
        shared.charge_output(bytes.len())?;
        lua.create_string(&bytes)
    })?;
    lua.globals().set("encode_message", f)
}

fn inject_output_of(_lua: &Lua, value: &Value, shared: &Shared) -> mlua::Result<Vec<u8>> {
    match value {
        Value::String(s) => {
            let bytes = s.as_bytes().to_vec();
            Message::decode(&bytes).map_err(|e| mlua::Error::RuntimeError(format!("invalid protobuf string: {e}")))?;
            Ok(bytes)
        }
        Value::Table(t) => {
            shared.fill_defaults(t)?;
            let bytes = table_codec::encode_table(t)?;
            shared.charge_output(bytes.len())?;
            Ok(bytes)
        }
        Value::UserData(ud) => {
            let reader = ud.borrow::<StreamReader>()?;
            let record = reader.last_record.borrow();
            let Some(bytes) = record.clone() else {
                return Err(mlua::Error::RuntimeError("stream reader has no current message to inject".to_string()));
            };
            Ok(bytes)
        }
        other => Err(mlua::Error::RuntimeError(format!("unsupported message type: {}", other.type_name()))),
    }
}

fn register_inject_message_input(lua: &Lua, shared: &Rc<Shared>) -> mlua::Result<()> {
    let shared = Rc::clone(shared);
    let f = lua.create_function(move |lua, (msg, checkpoint): (Value, Value)| {
        let bytes = inject_output_of(lua, &msg, &shared)?;
        let (numeric, string) = match checkpoint {
            Value::Number(n) => (Some(n), None),
            Value::Integer(i) => (Some(i as f64), None),
            Value::String(s) => (None, Some(s.to_str()?.to_string())),
            _ => (None, None),
        };
        shared.injected.borrow_mut().push(Injected { bytes, checkpoint_numeric: numeric, checkpoint_string: string });
        Ok(())
    })?;
    lua.globals().set("inject_message", f)
}

fn register_inject_message_analysis(lua: &Lua, shared: &Rc<Shared>) -> mlua::Result<()> {
    let shared = Rc::clone(shared);
    let f = lua.create_function(move |_lua, table: Table| {
        shared.fill_defaults(&table)?;
        let bytes = table_codec::encode_table(&table)?;
        shared.charge_output(bytes.len())?;
        shared.injected.borrow_mut().push(Injected { bytes, checkpoint_numeric: None, checkpoint_string: None });
        Ok(())
    })?;
    lua.globals().set("inject_message", f)
}

fn register_inject_payload(lua: &Lua, shared: &Rc<Shared>) -> mlua::Result<()> {
    let shared = Rc::clone(shared);
    let f = lua.create_function(move |lua, args: Variadic<Value>| {
        let payload_type = match args.first() {
            Some(Value::String(s)) => s.to_str()?.to_string(),
            _ => "txt".to_string(),
        };
        let payload_name = match args.get(1) {
            Some(Value::String(s)) => Some(s.to_str()?.to_string()),
            _ => None,
        };
        let parts: Vec<String> = args
            .iter()
            .skip(2)
            .map(|v| match v {
                Value::String(s) => s.to_str().map(|s| s.to_string()).unwrap_or_default(),
                Value::Number(n) => n.to_string(),
                Value::Integer(i) => i.to_string(),
                _ => String::new(),
            })
            .collect();
        let payload = parts.concat();

        let table = lua.create_table()?;
        let fields = lua.create_table()?;
        fields.set("payload_type", payload_type)?;
        if let Some(name) = payload_name {
            fields.set("payload_name", name)?;
        }
        table.set("Fields", fields)?;
        table.set("Type", "inject_payload")?;
        table.set("Payload", payload)?;
        shared.fill_defaults(&table)?;

        let bytes = table_codec::encode_table(&table)?;
        shared.charge_output(bytes.len())?;
        shared.injected.borrow_mut().push(Injected { bytes, checkpoint_numeric: None, checkpoint_string: None });
        Ok(())
    })?;
    lua.globals().set("inject_payload", f)
}

fn register_update_checkpoint(lua: &Lua, shared: &Rc<Shared>) -> mlua::Result<()> {
    let shared = Rc::clone(shared);
    let f = lua.create_function(move |_lua, (n, failures): (Option<f64>, Option<f64>)| {
        shared.checkpoints.borrow_mut().push(CheckpointUpdate { numeric: n, failures });
        Ok(())
    })?;
    lua.globals().set("update_checkpoint", f)
}

/// The Lua-facing `lsb.heka_stream_reader` userdata: an input buffer plus the
/// framer, so a script can feed it raw bytes from its own source and pull
/// framed records out one at a time. Grounded in `heka_stream_reader`
/// (`name`, `msg`, `buf` fields) and `hsr_find_message`/`hsr_decode_message`/
/// `hsr_read_message`.
pub struct StreamReader {
    name: String,
    buf: RefCell<InputBuffer>,
    last_record: RefCell<Option<Vec<u8>>>,
}

impl StreamReader {
    fn new(name: String) -> Self {
        StreamReader { name, buf: RefCell::new(InputBuffer::new(STREAM_READER_MAX_MESSAGE_SIZE)), last_record: RefCell::new(None) }
    }
}

impl UserData for StreamReader {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("find_message", |_lua, this, data: Option<mlua::String>| {
            if let Some(data) = data {
                let bytes = data.as_bytes();
                if this.buf.borrow_mut().write(&bytes) == heka_wire::ExpandResult::Full {
                    return Err(mlua::Error::RuntimeError(format!("{}: stream buffer full", this.name)));
                }
            }
            let scanpos_before = this.buf.borrow().scanpos();
            let (result, discarded) = heka_wire::find_message(&mut this.buf.borrow_mut());
            match result {
                FindResult::Found(bytes) => {
                    *this.last_record.borrow_mut() = Some(bytes);
                    let consumed = this.buf.borrow().scanpos() - scanpos_before;
                    Ok((true, consumed as i64, discarded as i64))
                }
                FindResult::NeedMoreData => {
                    *this.last_record.borrow_mut() = None;
                    Ok((false, 0i64, discarded as i64))
                }
            }
        });

        methods.add_method("decode_message", |lua, this, ()| {
            let record = this.last_record.borrow();
            let Some(bytes) = record.as_deref() else {
                return Err(mlua::Error::RuntimeError(format!("{}: no message to decode", this.name)));
            };
            let msg = Message::decode(bytes).map_err(|e| mlua::Error::RuntimeError(e.to_string()))?;
            table_codec::message_to_table(lua, &msg)
        });

        methods.add_method("read_message", |lua, this, (name, field_index, array_index): (String, Option<i64>, Option<i64>)| {
            let record = this.last_record.borrow();
            let Some(bytes) = record.as_deref() else {
                return Ok(Value::Nil);
            };
            read_message_against(lua, bytes, &name, field_index, array_index)
        });
    }
}

fn register_create_stream_reader(lua: &Lua) -> mlua::Result<()> {
    let f = lua.create_function(|_lua, name: String| {
        if name.len() >= 255 {
            return Err(mlua::Error::RuntimeError("create_stream_reader: name must be shorter than 255 bytes".to_string()));
        }
        Ok(StreamReader::new(name))
    })?;
    lua.globals().set("create_stream_reader", f)
}

fn register_is_running(lua: &Lua, shared: &Rc<Shared>) -> mlua::Result<()> {
    let shared = Rc::clone(shared);
    let f = lua.create_function(move |_lua, ()| Ok(shared.running.get()))?;
    lua.globals().set("is_running", f)
}

/// The Lua-facing `lsb.heka_message_matcher` userdata: a compiled match
/// expression evaluated against whichever message is currently active on
/// `shared`. Grounded in `mm_create`/`mm_eval`/`mm_check`/`mm_gc`.
pub struct MessageMatcher {
    node: heka_matcher::Node,
    shared: Rc<Shared>,
}

impl UserData for MessageMatcher {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("eval", |_lua, this, ()| {
            let current = this.shared.current_message.borrow();
            let Some(bytes) = current.as_deref() else {
                return Err(mlua::Error::RuntimeError("no active message to match against".to_string()));
            };
            let msg = Message::decode(bytes).map_err(|e| mlua::Error::RuntimeError(e.to_string()))?;
            Ok(heka_matcher::eval(&this.node, &msg))
        });
    }
}

fn register_create_message_matcher(lua: &Lua, shared: &Rc<Shared>) -> mlua::Result<()> {
    let shared = Rc::clone(shared);
    let f = lua.create_function(move |_lua, expr: String| match heka_matcher::compile(&expr) {
        Some(node) => Ok(MessageMatcher { node, shared: Rc::clone(&shared) }),
        None => Err(mlua::Error::RuntimeError(format!("create_message_matcher: invalid match expression: {expr}"))),
    })?;
    lua.globals().set("create_message_matcher", f)
}

pub fn register_input(lua: &Lua, shared: &Rc<Shared>) -> mlua::Result<()> {
    register_read_message(lua, shared)?;
    register_decode_message(lua)?;
    register_inject_message_input(lua, shared)?;
    register_create_stream_reader(lua)?;
    register_is_running(lua, shared)?;
    Ok(())
}

pub fn register_analysis(lua: &Lua, shared: &Rc<Shared>) -> mlua::Result<()> {
    register_read_message(lua, shared)?;
    register_decode_message(lua)?;
    register_inject_message_analysis(lua, shared)?;
    register_inject_payload(lua, shared)?;
    Ok(())
}

pub fn register_output(lua: &Lua, shared: &Rc<Shared>) -> mlua::Result<()> {
    register_read_message(lua, shared)?;
    register_decode_message(lua)?;
    register_encode_message(lua, shared)?;
    register_update_checkpoint(lua, shared)?;
    register_create_message_matcher(lua, shared)?;
    Ok(())
}
