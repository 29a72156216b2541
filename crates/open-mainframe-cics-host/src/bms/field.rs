//! BMS field definitions.
//!
//! A [`FieldControl`] pairs the static declaration of a field with the live
//! state the last send or receive left in it.

use serde::{Deserialize, Serialize};

use super::{screen_position, FieldAttributes, FieldColor, FieldHighlight, FieldJustify};

/// One named field of a map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldControl {
    /// Field name (symbolic map label)
    pub name: String,
    /// Row (1-based)
    pub row: usize,
    /// Column (1-based)
    pub column: usize,
    /// Value length in bytes
    pub length: usize,
    /// Value shown when the program supplies none
    #[serde(default)]
    pub initial: String,
    /// Edit mask (PICOUT)
    #[serde(default)]
    pub edit_mask: Option<String>,
    #[serde(default)]
    pub justify: FieldJustify,
    #[serde(default)]
    pub color: Option<FieldColor>,
    #[serde(default)]
    pub highlight: Option<FieldHighlight>,
    /// Declared IC (initial cursor)
    #[serde(default)]
    pub initial_cursor: bool,
    /// Declared attributes
    #[serde(default, rename = "attributes")]
    pub declared: FieldAttributes,
    /// Live attributes
    #[serde(skip)]
    pub attrs: FieldAttributes,
    /// Live value
    #[serde(skip)]
    pub value: String,
    /// Set when the last receive copied terminal input into the field
    #[serde(skip)]
    pub received: bool,
}

impl FieldControl {
    /// Create an unprotected alphanumeric field.
    pub fn new(name: impl Into<String>, row: usize, column: usize, length: usize) -> Self {
        Self {
            name: name.into().to_uppercase(),
            row,
            column,
            length,
            initial: String::new(),
            edit_mask: None,
            justify: FieldJustify::Left,
            color: None,
            highlight: None,
            initial_cursor: false,
            declared: FieldAttributes::default(),
            attrs: FieldAttributes::default(),
            value: String::new(),
            received: false,
        }
    }

    /// Protected field.
    pub fn protected(mut self) -> Self {
        self.declared.protected = true;
        self.reset();
        self
    }

    /// Autoskip field (protected numeric).
    pub fn autoskip(mut self) -> Self {
        self.declared.protected = true;
        self.declared.autoskip = true;
        self.reset();
        self
    }

    /// Numeric field; values are right justified and zero filled.
    pub fn numeric(mut self) -> Self {
        self.declared.numeric = true;
        self.reset();
        self
    }

    pub fn bright(mut self) -> Self {
        self.declared.bright = true;
        self.declared.dark = false;
        self.reset();
        self
    }

    pub fn dark(mut self) -> Self {
        self.declared.dark = true;
        self.declared.bright = false;
        self.reset();
        self
    }

    /// Field starts with the modified data tag set (FSET).
    pub fn fset(mut self) -> Self {
        self.declared.modified = true;
        self.reset();
        self
    }

    pub fn with_initial(mut self, initial: impl Into<String>) -> Self {
        self.initial = initial.into();
        self.reset();
        self
    }

    pub fn with_color(mut self, color: FieldColor) -> Self {
        self.color = Some(color);
        self
    }

    pub fn with_highlight(mut self, highlight: FieldHighlight) -> Self {
        self.highlight = Some(highlight);
        self
    }

    pub fn with_justify(mut self, justify: FieldJustify) -> Self {
        self.justify = justify;
        self
    }

    pub fn with_edit_mask(mut self, mask: impl Into<String>) -> Self {
        self.edit_mask = Some(mask.into());
        self
    }

    /// Place the cursor here when nothing else asks for it.
    pub fn cursor(mut self) -> Self {
        self.initial_cursor = true;
        self
    }

    /// Restore live state from the declaration.
    pub fn reset(&mut self) {
        self.attrs = self.declared;
        self.value = self.initial.clone();
        self.received = false;
    }

    /// Screen position, `(row-1)*80+column`.
    pub fn position(&self) -> usize {
        screen_position(self.row, self.column)
    }

    /// Bytes this field occupies in the record.
    pub fn slot_len(&self) -> usize {
        self.length + super::SLOT_OVERHEAD
    }

    /// Style string for the client: intensity first, then color and highlight.
    pub fn style(&self) -> String {
        let intensity = if self.attrs.dark {
            "dark"
        } else if self.attrs.bright {
            "bright"
        } else {
            "normal"
        };
        let mut parts = vec![intensity];
        if let Some(color) = self.color {
            parts.push(color.name());
        }
        if let Some(highlight) = self.highlight.filter(|h| *h != FieldHighlight::Normal) {
            parts.push(highlight.name());
        }
        parts.join(" ")
    }

    /// Read-only from the terminal's point of view.
    pub fn is_read_only(&self) -> bool {
        self.attrs.protected || self.attrs.autoskip
    }

    /// Value laid out for the record: justified and padded to the field length.
    ///
    /// Numeric fields drop `,` separators and are zero filled on the left.
    pub fn formatted_value(&self) -> String {
        let width = self.length;
        if self.attrs.numeric {
            let digits: String = self.value.trim().chars().filter(|c| *c != ',').collect();
            let tail = keep_last(&digits, width);
            return format!("{tail:0>width$}");
        }
        match self.justify {
            FieldJustify::Left => {
                let head: String = self.value.chars().take(width).collect();
                format!("{head:<width$}")
            }
            FieldJustify::Right => {
                let trimmed = self.value.trim_end();
                let tail = keep_last(trimmed, width);
                format!("{tail:>width$}")
            }
        }
    }
}

fn keep_last(text: &str, width: usize) -> String {
    let count = text.chars().count();
    text.chars().skip(count.saturating_sub(width)).collect()
}
