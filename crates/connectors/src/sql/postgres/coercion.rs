use crate::error::StoreError;
use model::core::value::Value;
use tokio_postgres::types::{ToSql, Type};

pub(crate) type Param = Box<dyn ToSql + Sync + Send>;

/// Parameter types the driver serializes natively from [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    SmallInt,
    Int,
    BigInt,
    Oid,
    Real,
    Double,
    Bool,
    Bytea,
    Text,
    Other,
}

impl Slot {
    fn of(ty: &Type) -> Self {
        if *ty == Type::INT2 {
            Slot::SmallInt
        } else if *ty == Type::INT4 {
            Slot::Int
        } else if *ty == Type::INT8 {
            Slot::BigInt
        } else if *ty == Type::OID {
            Slot::Oid
        } else if *ty == Type::FLOAT4 {
            Slot::Real
        } else if *ty == Type::FLOAT8 {
            Slot::Double
        } else if *ty == Type::BOOL {
            Slot::Bool
        } else if *ty == Type::BYTEA {
            Slot::Bytea
        } else if [Type::TEXT, Type::VARCHAR, Type::BPCHAR, Type::NAME, Type::UNKNOWN].contains(ty)
            || ty.name() == "citext"
        {
            Slot::Text
        } else {
            Slot::Other
        }
    }

    fn null(self) -> Param {
        match self {
            Slot::SmallInt => Box::new(Option::<i16>::None),
            Slot::Int => Box::new(Option::<i32>::None),
            Slot::BigInt => Box::new(Option::<i64>::None),
            Slot::Oid => Box::new(Option::<u32>::None),
            Slot::Real => Box::new(Option::<f32>::None),
            Slot::Double => Box::new(Option::<f64>::None),
            Slot::Bool => Box::new(Option::<bool>::None),
            Slot::Bytea => Box::new(Option::<Vec<u8>>::None),
            Slot::Text | Slot::Other => Box::new(Option::<String>::None),
        }
    }
}

/// Converts `value` into a parameter the server accepts for a `ty` slot.
///
/// Integers are narrowed to the column width and refused when they do not
/// fit. Types outside the native set are bound by the value's own type.
pub(crate) fn coerce(value: Value, ty: &Type) -> Result<Param, StoreError> {
    let slot = Slot::of(ty);
    let shown = value.to_string();

    let param: Option<Param> = match (slot, value) {
        (slot, Value::Null) => Some(slot.null()),
        (Slot::SmallInt, v) => integer(&v).and_then(|n| i16::try_from(n).ok()).map(boxed),
        (Slot::Int, v) => integer(&v).and_then(|n| i32::try_from(n).ok()).map(boxed),
        (Slot::BigInt, v) => integer(&v).map(boxed),
        (Slot::Oid, v) => integer(&v).and_then(|n| u32::try_from(n).ok()).map(boxed),
        (Slot::Real, v) => float(&v).map(|f| boxed(f as f32)),
        (Slot::Double, v) => float(&v).map(boxed),
        (Slot::Bool, Value::Boolean(b)) => Some(boxed(b)),
        (Slot::Bytea, Value::Bytes(b)) => Some(boxed(b)),
        (Slot::Bytea, Value::String(s)) => Some(boxed(s.into_bytes())),
        (Slot::Text, Value::String(s)) => Some(boxed(s)),
        (Slot::Text, Value::Bytes(_)) => None,
        (Slot::Text, v) => Some(boxed(v.to_string())),
        (Slot::Other, v) => Some(untyped(v)?),
        _ => None,
    };

    param.ok_or_else(|| StoreError::Unbindable(format!("{shown} as {ty}")))
}

/// Binds by the value's own type. Unsigned values travel as BIGINT.
fn untyped(value: Value) -> Result<Param, StoreError> {
    Ok(match value {
        Value::Int(v) => Box::new(v),
        Value::Uint(v) => {
            let v = i64::try_from(v).map_err(|_| StoreError::Unbindable(v.to_string()))?;
            Box::new(v)
        }
        Value::Float(v) => Box::new(v),
        Value::String(v) => Box::new(v),
        Value::Boolean(v) => Box::new(v),
        Value::Bytes(v) => Box::new(v),
        Value::Null => Box::new(Option::<String>::None),
    })
}

fn boxed<T: ToSql + Sync + Send + 'static>(value: T) -> Param {
    Box::new(value)
}

fn integer(value: &Value) -> Option<i64> {
    match value {
        Value::Int(v) => Some(*v),
        Value::Uint(v) => i64::try_from(*v).ok(),
        _ => None,
    }
}

fn float(value: &Value) -> Option<f64> {
    match value {
        Value::Float(v) => Some(*v),
        Value::Int(v) => Some(*v as f64),
        Value::Uint(v) => Some(*v as f64),
        _ => None,
    }
}
