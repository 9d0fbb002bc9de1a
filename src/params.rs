use rusqlite::Statement;

use crate::Value;

/// SQL parameter container.
#[derive(Clone, Debug, PartialEq)]
pub enum Params {
    /// Positional values mapped to `?` placeholders.
    Positional(Vec<Value>),
    /// Named values mapped to `:name`, `@name` or `$name` placeholders.
    Named(Vec<(String, Value)>),
}

impl Params {
    /// Builds positional parameters.
    pub fn positional(values: impl Into<Vec<Value>>) -> Self {
        Self::Positional(values.into())
    }

    /// Builds named parameters.
    ///
    /// Names can be provided with or without prefix (`:`, `@`, `$`); bare
    /// names are bound as `:name`.
    pub fn named<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self::Named(
            pairs
                .into_iter()
                .map(|(name, value)| (normalize_named_parameter(name.into()), value))
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Positional(values) => values.is_empty(),
            Self::Named(values) => values.is_empty(),
        }
    }

    /// Binds the values onto a prepared statement.
    ///
    /// Positional values must match the statement's placeholder count and
    /// every named value must match a placeholder; mismatches surface as
    /// rusqlite errors.
    pub(crate) fn bind(&self, stmt: &mut Statement<'_>) -> rusqlite::Result<()> {
        match self {
            Self::Positional(values) => {
                let expected = stmt.parameter_count();
                if values.len() != expected {
                    return Err(rusqlite::Error::InvalidParameterCount(values.len(), expected));
                }
                for (index, value) in values.iter().enumerate() {
                    stmt.raw_bind_parameter(index + 1, value)?;
                }
            }
            Self::Named(values) => {
                for (name, value) in values {
                    let index = stmt
                        .parameter_index(name)?
                        .ok_or_else(|| rusqlite::Error::InvalidParameterName(name.clone()))?;
                    stmt.raw_bind_parameter(index, value)?;
                }
            }
        }
        Ok(())
    }
}

fn normalize_named_parameter(name: String) -> String {
    if name.starts_with([':', '@', '$']) {
        name
    } else {
        format!(":{name}")
    }
}

impl Default for Params {
    fn default() -> Self {
        Self::Positional(Vec::new())
    }
}

impl From<()> for Params {
    fn from(_: ()) -> Self {
        Self::default()
    }
}

impl From<Vec<Value>> for Params {
    fn from(values: Vec<Value>) -> Self {
        Self::Positional(values)
    }
}

impl<const N: usize> From<[Value; N]> for Params {
    fn from(values: [Value; N]) -> Self {
        Self::Positional(values.into())
    }
}

impl From<Vec<(String, Value)>> for Params {
    fn from(values: Vec<(String, Value)>) -> Self {
        Self::named(values)
    }
}

impl<const N: usize> From<[(&str, Value); N]> for Params {
    fn from(values: [(&str, Value); N]) -> Self {
        Self::named(values)
    }
}

#[cfg(test)]
mod tests {
    use crate::{Params, Value};

    #[test]
    fn positional_from_array() {
        let params: Params = [Value::integer(1), Value::text("kit")].into();
        match params {
            Params::Positional(values) => assert_eq!(values.len(), 2),
            _ => panic!("expected positional"),
        }
    }

    #[test]
    fn named_builder_adds_missing_prefix() {
        let params = Params::named([("name", Value::text("kit")), ("@year", Value::integer(1999))]);
        match params {
            Params::Named(values) => {
                assert_eq!(values.len(), 2);
                assert_eq!(values[0].0, ":name");
                assert_eq!(values[1].0, "@year");
            }
            _ => panic!("expected named"),
        }
    }

    #[test]
    fn unit_is_empty() {
        assert!(Params::from(()).is_empty());
    }
}
