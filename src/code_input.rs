//! Row-of-boxes code entry.
//!
//! A [`CodeGroup`] is an ordered list of single-character cells with its own
//! focus. Groups never share focus: the guest form, the table form and the
//! ticket-code row each own one. [`AccessForm`] holds the groups and the
//! guest/table mode switch.

use crate::error::AccessError;
use lazy_static::lazy_static;
use regex::Regex;
use std::time::Duration;

/// Settling delay a UI should wait between a group completing and firing
/// validation. The group itself reports completion synchronously.
pub const AUTO_VALIDATE_DELAY: Duration = Duration::from_millis(50);

/// Separator inserted into table codes (`AB-12`).
pub const TABLE_CODE_SEPARATOR: char = '-';

lazy_static! {
    static ref GUEST_CODE_REGEX: Regex = Regex::new(r"^[A-Z0-9]{4}$").unwrap();
    static ref TABLE_CODE_REGEX: Regex = Regex::new(r"^[A-Z]{2}-[0-9]{2}$").unwrap();
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CellKind {
    Alphanumeric,
    Letter,
    Digit,
}

impl CellKind {
    pub fn accepts(self, c: char) -> bool {
        match self {
            CellKind::Alphanumeric => c.is_ascii_alphanumeric(),
            CellKind::Letter => c.is_ascii_alphabetic(),
            CellKind::Digit => c.is_ascii_digit(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupKind {
    /// 4 alphanumeric characters.
    Guest,
    /// 2 letters, then 2 digits; canonical form `AA-99`.
    Table,
    /// 4 alphanumeric characters entered after a table resolves.
    Ticket,
}

const ALNUM4: [CellKind; 4] = [CellKind::Alphanumeric; 4];
const TABLE_LAYOUT: [CellKind; 4] = [
    CellKind::Letter,
    CellKind::Letter,
    CellKind::Digit,
    CellKind::Digit,
];

impl GroupKind {
    pub fn layout(self) -> &'static [CellKind] {
        match self {
            GroupKind::Guest | GroupKind::Ticket => &ALNUM4,
            GroupKind::Table => &TABLE_LAYOUT,
        }
    }

    /// Index of the cell after which the canonical code carries a separator.
    pub fn separator_after(self) -> Option<usize> {
        match self {
            GroupKind::Table => Some(1),
            GroupKind::Guest | GroupKind::Ticket => None,
        }
    }

    /// Length of the canonical code string, separator included.
    pub fn code_len(self) -> usize {
        self.layout().len() + usize::from(self.separator_after().is_some())
    }

    /// Whether an already-assembled string has this group's canonical shape.
    pub fn is_valid_code(self, code: &str) -> bool {
        match self {
            GroupKind::Guest | GroupKind::Ticket => GUEST_CODE_REGEX.is_match(code),
            GroupKind::Table => TABLE_CODE_REGEX.is_match(code),
        }
    }
}

/// Trim and upper-case a typed or linked code.
pub fn normalize_code(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodeCell {
    pub kind: CellKind,
    value: Option<char>,
}

impl CodeCell {
    fn new(kind: CellKind) -> Self {
        CodeCell { kind, value: None }
    }

    pub fn value(&self) -> Option<char> {
        self.value
    }

    pub fn is_filled(&self) -> bool {
        self.value.is_some()
    }
}

/// What an edit did to the group.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct InputOutcome {
    /// Cell holding focus after the edit.
    pub focus: usize,
    /// Whether any cell value changed.
    pub changed: bool,
    /// Set when this edit filled the last missing cell.
    pub completed: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodeGroup {
    kind: GroupKind,
    cells: Vec<CodeCell>,
    focus: usize,
}

impl CodeGroup {
    pub fn new(kind: GroupKind) -> Self {
        CodeGroup {
            kind,
            cells: kind.layout().iter().map(|k| CodeCell::new(*k)).collect(),
            focus: 0,
        }
    }

    pub fn kind(&self) -> GroupKind {
        self.kind
    }

    pub fn cells(&self) -> &[CodeCell] {
        &self.cells
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.iter().all(|c| !c.is_filled())
    }

    pub fn focus(&self) -> usize {
        self.focus
    }

    pub fn values(&self) -> Vec<Option<char>> {
        self.cells.iter().map(|c| c.value).collect()
    }

    pub fn is_complete(&self) -> bool {
        self.cells.iter().all(CodeCell::is_filled)
    }

    fn last_index(&self) -> usize {
        self.cells.len().saturating_sub(1)
    }

    fn outcome(&self, was_complete: bool, changed: bool) -> InputOutcome {
        let completed = if changed && !was_complete && self.is_complete() {
            Some(self.get_code())
        } else {
            None
        };
        InputOutcome {
            focus: self.focus,
            changed,
            completed,
        }
    }

    /// Move focus to `index` (clamped).
    pub fn set_focus(&mut self, index: usize) {
        self.focus = index.min(self.last_index());
    }

    /// A character typed into cell `index`.
    ///
    /// Characters the cell does not accept are discarded and focus stays put.
    pub fn input(&mut self, index: usize, c: char) -> InputOutcome {
        let was_complete = self.is_complete();
        let Some(cell) = self.cells.get_mut(index) else {
            return self.outcome(was_complete, false);
        };
        self.focus = index;
        if !cell.kind.accepts(c) {
            return self.outcome(was_complete, false);
        }

        cell.value = Some(c.to_ascii_uppercase());
        if index < self.last_index() {
            self.focus = index + 1;
        }
        self.outcome(was_complete, true)
    }

    /// Backspace pressed in cell `index`.
    ///
    /// A filled cell is cleared in place. An empty cell moves focus back one
    /// cell and clears that one; on the first cell it does nothing.
    pub fn backspace(&mut self, index: usize) -> InputOutcome {
        let was_complete = self.is_complete();
        if index >= self.cells.len() {
            return self.outcome(was_complete, false);
        }
        self.focus = index;

        if self.cells[index].is_filled() {
            self.cells[index].value = None;
            return self.outcome(was_complete, true);
        }
        if index == 0 {
            return self.outcome(was_complete, false);
        }

        self.focus = index - 1;
        let changed = self.cells[index - 1].value.take().is_some();
        self.outcome(was_complete, changed)
    }

    pub fn arrow_left(&mut self) -> InputOutcome {
        self.focus = self.focus.saturating_sub(1);
        self.outcome(self.is_complete(), false)
    }

    pub fn arrow_right(&mut self) -> InputOutcome {
        self.focus = (self.focus + 1).min(self.last_index());
        self.outcome(self.is_complete(), false)
    }

    /// Distribute pasted text from the first empty cell onward.
    ///
    /// Non-alphanumerics are stripped, the rest upper-cased; characters a
    /// cell refuses are dropped, and anything past the last cell is ignored.
    pub fn paste(&mut self, text: &str) -> InputOutcome {
        let was_complete = self.is_complete();
        let Some(start) = self.cells.iter().position(|c| !c.is_filled()) else {
            self.focus = self.last_index();
            return self.outcome(was_complete, false);
        };

        let mut chars = text
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .map(|c| c.to_ascii_uppercase());
        let mut last_filled = None;

        for index in start..self.cells.len() {
            let kind = self.cells[index].kind;
            match chars.by_ref().find(|c| kind.accepts(*c)) {
                Some(c) => {
                    self.cells[index].value = Some(c);
                    last_filled = Some(index);
                }
                None => break,
            }
        }

        match last_filled {
            Some(index) => {
                self.focus = (index + 1).min(self.last_index());
                self.outcome(was_complete, true)
            }
            None => {
                self.focus = start;
                self.outcome(was_complete, false)
            }
        }
    }

    /// Canonical code string: cell values in order, with the table separator.
    pub fn get_code(&self) -> String {
        let mut code = String::with_capacity(self.kind.code_len());
        let sep = self.kind.separator_after();
        for (i, cell) in self.cells.iter().enumerate() {
            if let Some(v) = cell.value {
                code.push(v);
            }
            if Some(i) == sep && self.cells[i + 1..].iter().any(CodeCell::is_filled) {
                code.push(TABLE_CODE_SEPARATOR);
            }
        }
        code
    }

    /// Enter pressed: the code if complete, `IncompleteCode` otherwise.
    /// Does not modify the group, so repeated calls are harmless.
    pub fn submit(&self) -> Result<String, AccessError> {
        if self.is_complete() {
            Ok(self.get_code())
        } else {
            Err(AccessError::IncompleteCode {
                expected: self.kind.code_len(),
                got: self.get_code().len(),
            })
        }
    }

    /// Empty every cell and focus the first one.
    pub fn clear(&mut self) {
        for cell in &mut self.cells {
            cell.value = None;
        }
        self.focus = 0;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FormMode {
    #[default]
    Guest,
    Table,
}

/// Guest and table forms on the main view plus the ticket-code row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessForm {
    mode: FormMode,
    pub guest: CodeGroup,
    pub table: CodeGroup,
    pub ticket: CodeGroup,
}

impl Default for AccessForm {
    fn default() -> Self {
        AccessForm {
            mode: FormMode::Guest,
            guest: CodeGroup::new(GroupKind::Guest),
            table: CodeGroup::new(GroupKind::Table),
            ticket: CodeGroup::new(GroupKind::Ticket),
        }
    }
}

impl AccessForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> FormMode {
        self.mode
    }

    /// Switch forms. The form being left is cleared.
    pub fn switch_mode(&mut self, mode: FormMode) {
        if mode == self.mode {
            return;
        }
        match self.mode {
            FormMode::Guest => self.guest.clear(),
            FormMode::Table => self.table.clear(),
        }
        self.mode = mode;
    }

    pub fn active(&self) -> &CodeGroup {
        match self.mode {
            FormMode::Guest => &self.guest,
            FormMode::Table => &self.table,
        }
    }

    pub fn active_mut(&mut self) -> &mut CodeGroup {
        match self.mode {
            FormMode::Guest => &mut self.guest,
            FormMode::Table => &mut self.table,
        }
    }

    pub fn clear_all(&mut self) {
        self.guest.clear();
        self.table.clear();
        self.ticket.clear();
    }
}
