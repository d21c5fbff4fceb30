//! Gutter decorations grouped by test status.

use std::{collections::BTreeMap, sync::LazyLock};

use lsp_types::Range;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;

use crate::{Problem, Status};

/// Gutter style of a status.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Style {
    Success,
    Danger,
    DangerLight,
    Warning,
}

impl Style {
    #[must_use]
    pub fn icon(self) -> &'static str {
        match self {
            Style::Success => "success.svg",
            Style::Danger => "danger.svg",
            Style::DangerLight => "danger-light.svg",
            Style::Warning => "warning.svg",
        }
    }
}

/// Style of every known status.
pub static STYLES: LazyLock<BTreeMap<Status, Style>> = LazyLock::new(|| {
    BTreeMap::from([
        (Status::Passed, Style::Success),
        (Status::Error, Style::Danger),
        (Status::Failure, Style::Danger),
        (Status::Failed, Style::Danger),
        (Status::Warning, Style::Warning),
        (Status::Risky, Style::DangerLight),
        (Status::Incomplete, Style::Warning),
        (Status::Skipped, Style::Warning),
    ])
});

/// Ranges to decorate per status. Every known status is present; an empty
/// list clears that style.
pub type Decorations = BTreeMap<Status, Vec<Range>>;

/// Ranges of one status together with the style to draw them in.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct StyledRanges {
    pub style: Style,
    pub icon: &'static str,
    pub ranges: Vec<Range>,
}

/// Attach the gutter style of each status to its ranges.
#[must_use]
pub fn styled(decorations: Decorations) -> BTreeMap<Status, StyledRanges> {
    decorations
        .into_iter()
        .filter_map(|(status, ranges)| {
            let style = *STYLES.get(&status)?;
            Some((
                status,
                StyledRanges {
                    style,
                    icon: style.icon(),
                    ranges,
                },
            ))
        })
        .collect()
}

/// Group problem ranges by status.
#[must_use]
pub fn decorate<'a>(problems: impl IntoIterator<Item = &'a Problem>) -> Decorations {
    let mut decorations: Decorations = Status::iter().map(|status| (status, Vec::new())).collect();
    for problem in problems {
        decorations
            .entry(problem.status)
            .or_default()
            .push(problem.range);
    }
    decorations
}
