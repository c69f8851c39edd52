//! Conversion between a decoded [`heka_wire::Message`] and the Lua table
//! shape plugin scripts read and write (`decode_message`/`encode_message`/
//! `inject_message`'s table form).
//!
//! Simplification recorded as an open decision in `DESIGN.md`: a `Fields`
//! key holds either a scalar or, for a field with more than one array
//! value, a Lua array — one Lua entry per *field name*, not one per
//! wire-level field record. A plugin that emits the same field name twice
//! (legal on the wire, exercised by the matcher's duplicate-name tests)
//! round-trips through this table form as a single merged entry.

use heka_wire::{encode, FieldInput, FieldValue, FieldValueInput, Message, MessageInput};
use mlua::{Lua, Table, Value};

const HEADER_KEYS: &[&str] = &["Uuid", "Timestamp", "Type", "Logger", "Severity", "Payload", "EnvVersion", "Pid", "Hostname"];

pub fn message_to_table<'lua>(lua: &'lua Lua, msg: &Message<'_>) -> mlua::Result<Table> {
    let t = lua.create_table()?;
    t.set("Uuid", lua.create_string(msg.uuid)?)?;
    t.set("Timestamp", msg.timestamp)?;
    if let Some(v) = msg.r#type {
        t.set("Type", lua.create_string(v)?)?;
    }
    if let Some(v) = msg.logger {
        t.set("Logger", lua.create_string(v)?)?;
    }
    t.set("Severity", msg.severity)?;
    if let Some(v) = msg.payload {
        t.set("Payload", lua.create_string(v)?)?;
    }
    if let Some(v) = msg.env_version {
        t.set("EnvVersion", lua.create_string(v)?)?;
    }
    t.set("Pid", msg.pid)?;
    if let Some(v) = msg.hostname {
        t.set("Hostname", lua.create_string(v)?)?;
    }

    let fields = lua.create_table()?;
    for field in &msg.fields {
        let name = String::from_utf8_lossy(field.name).into_owned();
        let value = match msg.read_field(field.name, 0, 0) {
            FieldValue::Nil => Value::Nil,
            FieldValue::String(s) => Value::String(lua.create_string(s)?),
            FieldValue::Numeric(n) => Value::Number(n),
            FieldValue::Bool(b) => Value::Boolean(b),
        };
        fields.set(name, value)?;
    }
    t.set("Fields", fields)?;

    Ok(t)
}

pub fn table_to_input(table: &Table) -> mlua::Result<MessageInput> {
    let mut input = MessageInput::default();

    if let Ok(s) = table.get::<mlua::String>("Uuid") {
        input.uuid = Some(s.as_bytes().to_vec());
    }
    if let Ok(n) = table.get::<i64>("Timestamp") {
        input.timestamp = Some(n);
    }
    if let Ok(s) = table.get::<mlua::String>("Type") {
        input.r#type = Some(s.as_bytes().to_vec());
    }
    if let Ok(s) = table.get::<mlua::String>("Logger") {
        input.logger = Some(s.as_bytes().to_vec());
    }
    if let Ok(n) = table.get::<i32>("Severity") {
        input.severity = Some(n);
    }
    if let Ok(s) = table.get::<mlua::String>("Payload") {
        input.payload = Some(s.as_bytes().to_vec());
    }
    if let Ok(s) = table.get::<mlua::String>("EnvVersion") {
        input.env_version = Some(s.as_bytes().to_vec());
    }
    if let Ok(n) = table.get::<i32>("Pid") {
        input.pid = Some(n);
    }
    if let Ok(s) = table.get::<mlua::String>("Hostname") {
        input.hostname = Some(s.as_bytes().to_vec());
    }

    if let Ok(fields) = table.get::<Table>("Fields") {
        let mut entries = Vec::new();
        fields.for_each(|name: String, v: Value| {
            entries.push((name, v));
            Ok(())
        })?;
        for (name, value) in entries {
            let fv = match value {
                Value::String(s) => FieldValueInput::String(vec![s.as_bytes().to_vec()]),
                Value::Integer(i) => FieldValueInput::Integer(vec![i]),
                Value::Number(n) => FieldValueInput::Double(vec![n]),
                Value::Boolean(b) => FieldValueInput::Bool(vec![b]),
                Value::Table(arr) => {
                    let mut values = Vec::new();
                    for item in arr.sequence_values::<Value>() {
                        values.push(item?);
                    }
                    array_field_value(values)?
                }
                _ => continue,
            };
            input.fields.push(FieldInput { name: name.into_bytes(), representation: None, value: fv });
        }
    }

    Ok(input)
}

fn array_field_value(values: Vec<Value>) -> mlua::Result<FieldValueInput> {
    if values.iter().all(|v| matches!(v, Value::Boolean(_))) {
        return Ok(FieldValueInput::Bool(
            values.into_iter().map(|v| if let Value::Boolean(b) = v { b } else { unreachable!() }).collect(),
        ));
    }
    if values.iter().all(|v| matches!(v, Value::Integer(_))) {
        return Ok(FieldValueInput::Integer(
            values.into_iter().map(|v| if let Value::Integer(i) = v { i } else { unreachable!() }).collect(),
        ));
    }
    if values.iter().all(|v| matches!(v, Value::Number(_) | Value::Integer(_))) {
        return Ok(FieldValueInput::Double(
            values
                .into_iter()
                .map(|v| match v {
                    Value::Number(n) => n,
                    Value::Integer(i) => i as f64,
                    _ => unreachable!(),
                })
                .collect(),
        ));
    }
    let mut out = Vec::with_capacity(values.len());
    for v in values {
        match v {
            Value::String(s) => out.push(s.as_bytes().to_vec()),
            other => return Err(mlua::Error::RuntimeError(format!("unsupported Fields array element: {other:?}"))),
        }
    }
    Ok(FieldValueInput::String(out))
}

pub fn encode_table(table: &Table) -> mlua::Result<Vec<u8>> {
    let input = table_to_input(table)?;
    Ok(encode(&input))
}

pub fn is_header_key(name: &str) -> bool {
    HEADER_KEYS.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use heka_wire::{FieldInput, FieldValueInput, MessageInput};

    #[test]
    fn round_trips_headers_and_fields_through_the_table_form() {
        let lua = Lua::new();
        let bytes = encode(&MessageInput {
            uuid: Some(vec![7u8; 16]),
            timestamp: Some(123),
            r#type: Some(b"TEST".to_vec()),
            severity: Some(3),
            fields: vec![
                FieldInput { name: b"count".to_vec(), representation: None, value: FieldValueInput::Integer(vec![42]) },
                FieldInput { name: b"name".to_vec(), representation: None, value: FieldValueInput::String(vec![b"bob".to_vec()]) },
            ],
            ..Default::default()
        });
        let msg = Message::decode(&bytes).unwrap();
        let table = message_to_table(&lua, &msg).unwrap();

        let ty: String = table.get("Type").unwrap();
        assert_eq!(ty, "TEST");
        let severity: i64 = table.get("Severity").unwrap();
        assert_eq!(severity, 3);
        let fields: Table = table.get("Fields").unwrap();
        let count: i64 = fields.get("count").unwrap();
        assert_eq!(count, 42);
        let name: String = fields.get("name").unwrap();
        assert_eq!(name, "bob");

        let re_encoded = encode_table(&table).unwrap();
        let re_decoded = Message::decode(&re_encoded).unwrap();
        assert_eq!(re_decoded.r#type, Some(&b"TEST"[..]));
        assert_eq!(re_decoded.severity, 3);
    }
}
