use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::{Statement, ToSql};

/// A dynamically typed value accepted by the [`params!`] and [`named_params!`] macros.
#[derive(Debug, Clone, PartialEq)]
pub enum ToSqlType {
  Null,
  Integer(i64),
  Real(f64),
  Text(String),
  Blob(Vec<u8>),
}

impl ToSql for ToSqlType {
  fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
    return Ok(match self {
      Self::Null => ToSqlOutput::Borrowed(ValueRef::Null),
      Self::Integer(v) => ToSqlOutput::Owned(Value::Integer(*v)),
      Self::Real(v) => ToSqlOutput::Owned(Value::Real(*v)),
      Self::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
      Self::Blob(v) => ToSqlOutput::Borrowed(ValueRef::Blob(v)),
    });
  }
}

macro_rules! from_int {
  ($($t:ty),+) => {
    $(
      impl From<$t> for ToSqlType {
        fn from(v: $t) -> Self {
          return Self::Integer(v as i64);
        }
      }
    )+
  };
}
from_int!(i8, i16, i32, i64, u8, u16, u32, bool);

impl From<f64> for ToSqlType {
  fn from(v: f64) -> Self {
    return Self::Real(v);
  }
}

impl From<&str> for ToSqlType {
  fn from(v: &str) -> Self {
    return Self::Text(v.to_string());
  }
}

impl From<String> for ToSqlType {
  fn from(v: String) -> Self {
    return Self::Text(v);
  }
}

impl From<Vec<u8>> for ToSqlType {
  fn from(v: Vec<u8>) -> Self {
    return Self::Blob(v);
  }
}

impl<T> From<Option<T>> for ToSqlType
where
  T: Into<ToSqlType>,
{
  fn from(v: Option<T>) -> Self {
    return v.map_or(Self::Null, Into::into);
  }
}

/// Positional parameters bound to a prepared statement.
pub trait Params {
  fn bind(&self, stmt: &mut Statement<'_>) -> rusqlite::Result<()>;
}

impl<T> Params for T
where
  T: AsRef<[ToSqlType]>,
{
  fn bind(&self, stmt: &mut Statement<'_>) -> rusqlite::Result<()> {
    for (idx, value) in self.as_ref().iter().enumerate() {
      stmt.raw_bind_parameter(idx + 1, value)?;
    }
    return Ok(());
  }
}

/// Named parameters, e.g. `:account`, bound to a prepared statement.
pub type NamedParams = Vec<(String, ToSqlType)>;
pub type NamedParamsRef<'a> = [(&'a str, ToSqlType)];
pub type NamedParamRef<'a> = (&'a str, ToSqlType);

impl Params for NamedParamsRef<'_> {
  fn bind(&self, stmt: &mut Statement<'_>) -> rusqlite::Result<()> {
    for (name, value) in self {
      if let Some(idx) = stmt.parameter_index(&format!(":{name}"))? {
        stmt.raw_bind_parameter(idx, value)?;
      }
    }
    return Ok(());
  }
}

impl Params for NamedParams {
  fn bind(&self, stmt: &mut Statement<'_>) -> rusqlite::Result<()> {
    for (name, value) in self {
      if let Some(idx) = stmt.parameter_index(&format!(":{name}"))? {
        stmt.raw_bind_parameter(idx, value)?;
      }
    }
    return Ok(());
  }
}

impl Params for () {
  fn bind(&self, _stmt: &mut Statement<'_>) -> rusqlite::Result<()> {
    return Ok(());
  }
}
