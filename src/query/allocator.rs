//! Positional parameter allocation for one statement compilation.

use crate::types::params::SqlValue;

/// Mutable cursor threading through a single compilation.
///
/// Placeholders are 1-based and handed out in emission order, so the final
/// parameter list lines up with the placeholders by construction. CTE aliases
/// come from an independent counter and are assigned in pre-order.
#[derive(Debug, Default)]
pub struct ParamAllocator {
    position: usize,
    cte_count: usize,
    parameters: Vec<SqlValue>,
}

impl ParamAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a value and returns its `$N` placeholder.
    pub fn bind(&mut self, value: impl Into<SqlValue>) -> String {
        self.position += 1;
        self.parameters.push(value.into());
        format!("${}", self.position)
    }

    /// Next `nested_N` common-table-expression alias.
    pub fn next_cte_alias(&mut self) -> String {
        self.cte_count += 1;
        format!("nested_{}", self.cte_count)
    }

    /// Highest placeholder number handed out so far.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Consumes the allocator, yielding the ordered parameter list.
    pub fn into_parameters(self) -> Vec<SqlValue> {
        self.parameters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_are_one_based_and_sequential() {
        let mut alloc = ParamAllocator::new();
        assert_eq!(alloc.bind(1i64), "$1");
        assert_eq!(alloc.bind("mass"), "$2");
        assert_eq!(alloc.bind(1.5f64), "$3");
        assert_eq!(alloc.position(), 3);
        assert_eq!(
            alloc.into_parameters(),
            vec![
                SqlValue::Integer(1),
                SqlValue::Text("mass".to_string()),
                SqlValue::Float(1.5),
            ]
        );
    }

    #[test]
    fn cte_aliases_count_independently_of_parameters() {
        let mut alloc = ParamAllocator::new();
        alloc.bind(1i64);
        assert_eq!(alloc.next_cte_alias(), "nested_1");
        alloc.bind(2i64);
        assert_eq!(alloc.next_cte_alias(), "nested_2");
        assert_eq!(alloc.position(), 2);
    }
}
