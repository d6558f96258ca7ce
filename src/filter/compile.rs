//! Turns a parsed filter into query maker calls.
//!
//! Every OR-group becomes `begin_or .. end_group`; every element inside it is
//! wrapped in its own group (`begin_and` when negated, `begin_or`
//! otherwise). Fields the target does not support are skipped, leaving an
//! empty group that matches everything.

use chrono::{DateTime, Local};
use log::debug;

use crate::query::{FilterField, FilterMask, NumberComparison, QueryMaker};

use super::date::parse_filter_date;
use super::parser::{FilterElement, FilterExpression, MatchMode};

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;
const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Adds `expression` to `qm`. Bare words search `level_fields` and the title.
pub fn add_textual_filter(
    qm: &mut dyn QueryMaker,
    expression: &FilterExpression,
    level_fields: &[FilterField],
) {
    add_textual_filter_at(qm, expression, level_fields, Local::now());
}

/// Same as [`add_textual_filter`] with relative dates resolved against `now`.
pub fn add_textual_filter_at(
    qm: &mut dyn QueryMaker,
    expression: &FilterExpression,
    level_fields: &[FilterField],
    now: DateTime<Local>,
) {
    let compiler = FilterCompiler {
        valid: qm.valid_filter_mask(),
        level_fields,
        now,
    };
    for group in &expression.groups {
        qm.begin_or();
        for element in group {
            if element.negate {
                qm.begin_and();
            } else {
                qm.begin_or();
            }
            compiler.compile_element(qm, element);
            qm.end_group();
        }
        qm.end_group();
    }
}

struct FilterCompiler<'a> {
    valid: FilterMask,
    level_fields: &'a [FilterField],
    now: DateTime<Local>,
}

impl FilterCompiler<'_> {
    fn supports(&self, field: FilterField) -> bool {
        self.valid.contains(field.mask())
    }

    fn compile_element(&self, qm: &mut dyn QueryMaker, element: &FilterElement) {
        let Some(name) = &element.field else {
            self.compile_bare_text(qm, element);
            return;
        };
        let Some(field) = FilterField::from_name(name) else {
            debug!("Dropping filter on unknown field {:?}", name);
            return;
        };
        if !self.supports(field) {
            debug!("Dropping filter on unsupported field {:?}", field);
            return;
        }

        match field {
            FilterField::Url => text_filter(qm, field, &element.text, false, element.negate),
            FilterField::Length => {
                if let Some(seconds) = parse_integer(&element.text) {
                    number_filter(
                        qm,
                        field,
                        seconds.saturating_mul(1000),
                        comparison(element.match_mode),
                        element.negate,
                    );
                }
            }
            FilterField::Filesize => self.compile_filesize(qm, element),
            _ if field.is_date() => self.compile_date(qm, field, element),
            _ if field.is_numeric() => {
                if let Some(value) = parse_integer(&element.text) {
                    number_filter(
                        qm,
                        field,
                        value,
                        comparison(element.match_mode),
                        element.negate,
                    );
                }
            }
            _ => text_filter(
                qm,
                field,
                &element.text,
                element.match_mode == MatchMode::Equals,
                element.negate,
            ),
        }
    }

    /// Matches any searched field, or none of them when negated.
    fn compile_bare_text(&self, qm: &mut dyn QueryMaker, element: &FilterElement) {
        let mut fields: Vec<FilterField> = Vec::new();
        for field in self.level_fields.iter().copied().chain([FilterField::Title]) {
            if !fields.contains(&field) && self.supports(field) {
                fields.push(field);
            }
        }
        for field in fields {
            text_filter(qm, field, &element.text, false, element.negate);
        }
    }

    fn compile_filesize(&self, qm: &mut dyn QueryMaker, element: &FilterElement) {
        let Ok(megabytes) = element.text.trim().parse::<f64>() else {
            return;
        };
        let field = FilterField::Filesize;
        match comparison(element.match_mode) {
            NumberComparison::Equals => {
                let floor = megabytes.abs().trunc() as i64;
                range_filter(
                    qm,
                    field,
                    floor.saturating_mul(BYTES_PER_MB as i64),
                    (floor + 1).saturating_mul(BYTES_PER_MB as i64),
                    element.negate,
                );
            }
            cmp => number_filter(
                qm,
                field,
                (megabytes * BYTES_PER_MB) as i64,
                cmp,
                element.negate,
            ),
        }
    }

    fn compile_date(&self, qm: &mut dyn QueryMaker, field: FilterField, element: &FilterElement) {
        let Some(date) = parse_filter_date(&element.text, self.now) else {
            debug!("Dropping unparseable date filter {:?}", element.text);
            return;
        };
        let timestamp = date.timestamp;

        if date.absolute {
            match comparison(element.match_mode) {
                NumberComparison::Equals => range_filter(
                    qm,
                    field,
                    timestamp - 1,
                    timestamp + SECONDS_PER_DAY,
                    element.negate,
                ),
                cmp => number_filter(qm, field, timestamp, cmp, element.negate),
            }
            return;
        }

        // A relative date is an age: "more than" an age is before the cutoff.
        let cmp = match element.match_mode {
            MatchMode::GreaterThan => NumberComparison::LessThan,
            _ => NumberComparison::GreaterThan,
        };
        number_filter(qm, field, timestamp, cmp, element.negate);
    }
}

fn comparison(match_mode: MatchMode) -> NumberComparison {
    match match_mode {
        MatchMode::GreaterThan => NumberComparison::GreaterThan,
        MatchMode::LessThan => NumberComparison::LessThan,
        MatchMode::Contains | MatchMode::Equals => NumberComparison::Equals,
    }
}

fn parse_integer(text: &str) -> Option<i64> {
    let trimmed = text.trim();
    trimmed
        .parse::<i64>()
        .ok()
        .or_else(|| trimmed.parse::<f64>().ok().map(|value| value as i64))
}

fn text_filter(qm: &mut dyn QueryMaker, field: FilterField, text: &str, exact: bool, negate: bool) {
    if negate {
        qm.exclude_filter(field, text, exact, exact);
    } else {
        qm.add_filter(field, text, exact, exact);
    }
}

fn number_filter(
    qm: &mut dyn QueryMaker,
    field: FilterField,
    value: i64,
    cmp: NumberComparison,
    negate: bool,
) {
    if negate {
        qm.exclude_number_filter(field, value, cmp);
    } else {
        qm.add_number_filter(field, value, cmp);
    }
}

/// `lower < value < upper`, or its complement when negated.
fn range_filter(qm: &mut dyn QueryMaker, field: FilterField, lower: i64, upper: i64, negate: bool) {
    if negate {
        qm.begin_or();
    } else {
        qm.begin_and();
    }
    number_filter(qm, field, lower, NumberComparison::GreaterThan, negate);
    number_filter(qm, field, upper, NumberComparison::LessThan, negate);
    qm.end_group();
}
