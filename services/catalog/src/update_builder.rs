//! Partial update statements for catalog records.
//!
//! [`UpdateBuilder`] accumulates one assignment per present field and renders a
//! statement only when at least one field was supplied. Columns whose names are
//! reserved words in SQL (`date` among them) are emitted as quoted identifiers,
//! so the statement is valid for any combination of fields.

/// Column names that must be quoted when used as identifiers
const RESERVED_WORDS: &[&str] = &[
    "all", "and", "as", "by", "date", "desc", "from", "group", "order", "select", "table", "time",
    "timestamp", "user", "where",
];

/// Parameter index of the record key; assignments start after it
const KEY_PLACEHOLDER: usize = 1;

/// One pending `column = $n` assignment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    /// Column as named in the catalog model
    pub field: &'static str,
    /// Bind placeholder, `$2` onwards
    pub placeholder: String,
    pub value: String,
    /// Quoted identifier used in place of `field` when it is a reserved word
    pub alias: Option<String>,
}

impl Assignment {
    /// Identifier rendered into the statement
    pub fn identifier(&self) -> &str {
        self.alias.as_deref().unwrap_or(self.field)
    }
}

/// Whether `name` collides with a reserved word
pub fn is_reserved(name: &str) -> bool {
    RESERVED_WORDS.contains(&name.to_ascii_lowercase().as_str())
}

/// Accumulates field assignments for a single record
#[derive(Debug, Clone)]
pub struct UpdateBuilder {
    table: &'static str,
    key: String,
    assignments: Vec<Assignment>,
}

impl UpdateBuilder {
    pub fn new(table: &'static str, key: impl Into<String>) -> Self {
        Self {
            table,
            key: key.into(),
            assignments: Vec::new(),
        }
    }

    /// Assign `field` when a value is present; absent values leave the column untouched
    pub fn set(mut self, field: &'static str, value: Option<impl Into<String>>) -> Self {
        if let Some(value) = value {
            let placeholder = format!("${}", KEY_PLACEHOLDER + self.assignments.len() + 1);
            let alias = is_reserved(field).then(|| format!("\"{}\"", field));
            self.assignments.push(Assignment {
                field,
                placeholder,
                value: value.into(),
                alias,
            });
        }
        self
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Finish the statement, or `None` when no field was assigned
    pub fn build(self) -> Option<UpdateStatement> {
        if self.assignments.is_empty() {
            return None;
        }

        Some(UpdateStatement {
            table: self.table,
            key: self.key,
            assignments: self.assignments,
        })
    }
}

/// A non-empty partial update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateStatement {
    table: &'static str,
    key: String,
    assignments: Vec<Assignment>,
}

impl UpdateStatement {
    /// Key of the record being updated, bound to `$1`
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn assignments(&self) -> &[Assignment] {
        &self.assignments
    }

    /// Values in placeholder order, starting at `$2`
    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.assignments.iter().map(|a| a.value.as_str())
    }

    /// Render the parameterized statement
    pub fn sql(&self) -> String {
        let set_clause = self
            .assignments
            .iter()
            .map(|a| format!("{} = {}", a.identifier(), a.placeholder))
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "UPDATE {} SET {} WHERE id = ${}",
            self.table, set_clause, KEY_PLACEHOLDER
        )
    }
}
