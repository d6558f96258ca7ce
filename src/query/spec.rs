//! Plain configuration record shared by query maker implementations.

use crate::meta::Entity;

use super::{
    AlbumQueryMode, FilterField, LabelQueryMode, NumberComparison, QueryType, ReturnFunction,
};

/// Compiled boolean filter. Empty groups match everything.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterNode {
    And(Vec<FilterNode>),
    Or(Vec<FilterNode>),
    Text {
        field: FilterField,
        text: String,
        match_begin: bool,
        match_end: bool,
        exclude: bool,
    },
    Number {
        field: FilterField,
        value: i64,
        cmp: NumberComparison,
        exclude: bool,
    },
}

impl FilterNode {
    fn children_mut(&mut self) -> &mut Vec<FilterNode> {
        match self {
            FilterNode::And(children) | FilterNode::Or(children) => children,
            _ => unreachable!("only groups are pushed on the filter stack"),
        }
    }

    pub fn is_empty_group(&self) -> bool {
        matches!(self, FilterNode::And(children) | FilterNode::Or(children) if children.is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct QuerySpec {
    pub query_type: QueryType,
    pub matches: Vec<Entity>,
    pub album_query_mode: AlbumQueryMode,
    pub label_query_mode: LabelQueryMode,
    pub order_by: Vec<(FilterField, bool)>,
    pub limit: Option<usize>,
    pub return_as_data: bool,
    pub return_values: Vec<FilterField>,
    pub return_functions: Vec<(ReturnFunction, FilterField)>,
    // Bottom entry is the implicit top-level AND.
    pub(crate) filter_stack: Vec<FilterNode>,
}

impl Default for QuerySpec {
    fn default() -> Self {
        Self {
            query_type: QueryType::default(),
            matches: Vec::new(),
            album_query_mode: AlbumQueryMode::default(),
            label_query_mode: LabelQueryMode::default(),
            order_by: Vec::new(),
            limit: None,
            return_as_data: false,
            return_values: Vec::new(),
            return_functions: Vec::new(),
            filter_stack: vec![FilterNode::And(Vec::new())],
        }
    }
}

impl QuerySpec {
    pub fn push_clause(&mut self, clause: FilterNode) {
        self.filter_stack
            .last_mut()
            .expect("filter stack always holds the root group")
            .children_mut()
            .push(clause);
    }

    pub fn add_text_clause(
        &mut self,
        field: FilterField,
        text: &str,
        match_begin: bool,
        match_end: bool,
        exclude: bool,
    ) {
        self.push_clause(FilterNode::Text {
            field,
            text: text.to_string(),
            match_begin,
            match_end,
            exclude,
        });
    }

    pub fn add_number_clause(
        &mut self,
        field: FilterField,
        value: i64,
        cmp: NumberComparison,
        exclude: bool,
    ) {
        self.push_clause(FilterNode::Number {
            field,
            value,
            cmp,
            exclude,
        });
    }

    pub fn begin_and(&mut self) {
        self.filter_stack.push(FilterNode::And(Vec::new()));
    }

    pub fn begin_or(&mut self) {
        self.filter_stack.push(FilterNode::Or(Vec::new()));
    }

    pub fn end_group(&mut self) {
        assert!(
            self.filter_stack.len() > 1,
            "end_group called without a matching begin_and/begin_or"
        );
        if let Some(group) = self.filter_stack.pop() {
            self.push_clause(group);
        }
    }

    pub fn open_groups(&self) -> usize {
        self.filter_stack.len() - 1
    }

    /// The finished filter tree. Panics while groups are still open.
    pub fn filter(&self) -> &FilterNode {
        assert_eq!(
            self.open_groups(),
            0,
            "query filter has unbalanced begin_and/begin_or groups"
        );
        &self.filter_stack[0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_groups_nest_in_call_order() {
        let mut spec = QuerySpec::default();
        spec.begin_or();
        spec.add_text_clause(FilterField::Artist, "pink", false, false, false);
        spec.begin_and();
        spec.add_number_clause(FilterField::Rating, 7, NumberComparison::GreaterThan, false);
        spec.end_group();
        spec.end_group();

        let FilterNode::And(root) = spec.filter() else {
            panic!("root should be an AND group");
        };
        assert_eq!(root.len(), 1);
        let FilterNode::Or(children) = &root[0] else {
            panic!("expected OR group");
        };
        assert_eq!(children.len(), 2);
        assert!(matches!(children[1], FilterNode::And(ref inner) if inner.len() == 1));
    }

    #[test]
    #[should_panic(expected = "without a matching")]
    fn test_unmatched_end_group_panics() {
        let mut spec = QuerySpec::default();
        spec.end_group();
    }

    #[test]
    #[should_panic(expected = "unbalanced")]
    fn test_reading_filter_with_open_group_panics() {
        let mut spec = QuerySpec::default();
        spec.begin_and();
        let _ = spec.filter();
    }
}
