use crate::{
    error::StoreError,
    sql::postgres::coercion::{Param, coerce},
};
use model::core::value::Value;
use tokio_postgres::types::{ToSql, Type};

/// Positional parameters of one prepared statement, owned for the duration
/// of the call.
pub struct Bindings(Vec<Param>);

impl Bindings {
    /// Converts scan and update values into parameters of the types the
    /// server inferred for the statement.
    pub fn for_types(values: Vec<Value>, types: &[Type]) -> Result<Self, StoreError> {
        if values.len() != types.len() {
            return Err(StoreError::Unbindable(format!(
                "{} values for {} placeholders",
                values.len(),
                types.len()
            )));
        }
        values
            .into_iter()
            .zip(types)
            .map(|(value, ty)| coerce(value, ty))
            .collect::<Result<Vec<_>, _>>()
            .map(Bindings)
    }

    pub fn refs(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.0
            .iter()
            .map(|p| &**p as &(dyn ToSql + Sync))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        sql::query::QueryGenerator,
        store::{ScanBound, ScanRequest},
    };
    use bytes::BytesMut;

    #[test]
    fn resumed_scan_on_integer_key_binds_as_int4() {
        let request = ScanRequest::new("posts", "id").bound(ScanBound::From(2));
        let (_, params) = QueryGenerator::new().select(&request);

        let bindings = Bindings::for_types(params, &[Type::INT4]).unwrap();
        assert_eq!(bindings.len(), 1);
        let refs = bindings.refs();
        assert!(refs[0].to_sql_checked(&Type::INT4, &mut BytesMut::new()).is_ok());
    }

    #[test]
    fn placeholder_count_must_match() {
        let err = Bindings::for_types(vec![Value::Uint(1)], &[]).err().unwrap();
        assert!(matches!(err, StoreError::Unbindable(_)));
    }

    #[test]
    fn refuses_keys_beyond_bigint() {
        let err = Bindings::for_types(vec![Value::Uint(u64::MAX)], &[Type::INT8])
            .err()
            .unwrap();
        assert!(matches!(err, StoreError::Unbindable(_)));
    }
}
