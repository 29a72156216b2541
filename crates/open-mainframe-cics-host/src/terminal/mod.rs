//! Terminal exchange payload.
//!
//! Each turn the client and the session exchange a [`FieldList`]: a control
//! key followed by named screen fields. On the wire it is a JSON array whose
//! first element is the control key.

pub mod port;
pub mod protocol;

use serde::{Deserialize, Serialize};

use crate::aid::Aid;
use crate::CicsError;

/// Control key value asking the client to keep the conversation going.
pub const RETURN: &str = "RETURN";
/// Control key value ending the conversation.
pub const QUIT: &str = "QUIT";
/// Prefix of an explicit entry point (`EntryPoint:CT02`).
pub const ENTRY_POINT_PREFIX: &str = "EntryPoint:";
/// Name of the diagnostic field on synthetic screens.
pub const ERROR_FIELD: &str = "ERRMSG";

/// First element of every exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlKey {
    /// RETURN, QUIT, a key name, `EntryPoint:<transid>` or a transaction code
    pub entry_or_key: String,
    /// Field holding the cursor
    #[serde(default)]
    pub current_control: String,
    /// Cursor position, `(row-1)*80+column`; a decimal string on the wire
    #[serde(default, with = "position")]
    pub current_position: usize,
    /// Sound the alarm
    #[serde(default)]
    pub alarm: bool,
}

/// `currentPosition` travels as a string. Numbers are accepted on input.
mod position {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(usize),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &usize, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<usize, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(n),
            Raw::Text(text) => {
                let text = text.trim();
                if text.is_empty() {
                    return Ok(0);
                }
                text.parse()
                    .map_err(|_| D::Error::custom(format!("invalid cursor position '{text}'")))
            }
        }
    }
}

/// What the client asked for with `entryOrKey`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry<'a> {
    Empty,
    Return,
    Quit,
    Key(Aid),
    EntryPoint(&'a str),
    Transaction(&'a str),
}

impl ControlKey {
    pub fn new(entry_or_key: impl Into<String>) -> Self {
        Self {
            entry_or_key: entry_or_key.into(),
            ..Self::default()
        }
    }

    /// Classify `entryOrKey`.
    pub fn entry(&self) -> Entry<'_> {
        let text = self.entry_or_key.trim();
        if text.is_empty() {
            Entry::Empty
        } else if text.eq_ignore_ascii_case(RETURN) {
            Entry::Return
        } else if text.eq_ignore_ascii_case(QUIT) {
            Entry::Quit
        } else if let Some(name) = text.strip_prefix(ENTRY_POINT_PREFIX) {
            Entry::EntryPoint(name.trim())
        } else if let Some(aid) = Aid::from_name(text) {
            Entry::Key(aid)
        } else {
            Entry::Transaction(text)
        }
    }
}

/// One named field as shown to the client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenField {
    pub name: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub length: usize,
    #[serde(default)]
    pub style: String,
    #[serde(default)]
    pub modified: bool,
    #[serde(default)]
    pub autoskip: bool,
}

impl ScreenField {
    /// A field the user typed into.
    pub fn input(name: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            name: name.into(),
            length: text.chars().count(),
            text,
            modified: true,
            ..Self::default()
        }
    }
}

/// One element of the wire array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExchangeItem {
    Control(ControlKey),
    Field(ScreenField),
}

/// Control key plus screen fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ExchangeItem>", into = "Vec<ExchangeItem>")]
pub struct FieldList {
    pub control: ControlKey,
    pub fields: Vec<ScreenField>,
}

impl FieldList {
    pub fn new(control: ControlKey, fields: Vec<ScreenField>) -> Self {
        Self { control, fields }
    }

    /// Input that starts a transaction by code.
    pub fn entry(transid: &str) -> Self {
        Self::new(ControlKey::new(transid), Vec::new())
    }

    /// Input for an explicit entry point.
    pub fn entry_point(transid: &str) -> Self {
        Self::new(ControlKey::new(format!("{ENTRY_POINT_PREFIX}{transid}")), Vec::new())
    }

    /// Input carrying an attention key.
    pub fn key(aid: Aid) -> Self {
        Self::new(ControlKey::new(aid.name()), Vec::new())
    }

    /// Input ending the conversation.
    pub fn quit() -> Self {
        Self::new(ControlKey::new(QUIT), Vec::new())
    }

    /// Add a typed field.
    pub fn with_field(mut self, name: &str, text: &str) -> Self {
        self.fields.push(ScreenField::input(name, text));
        self
    }

    /// Place the cursor on a field.
    pub fn with_cursor(mut self, name: &str) -> Self {
        self.control.current_control = name.to_string();
        self
    }

    /// Single-field diagnostic screen.
    pub fn error_screen(entry_or_key: &str, message: &str) -> Self {
        let field = ScreenField {
            name: ERROR_FIELD.to_string(),
            text: message.to_string(),
            read_only: true,
            length: message.chars().count(),
            style: "bright red".to_string(),
            modified: false,
            autoskip: true,
        };
        let control = ControlKey {
            entry_or_key: entry_or_key.to_string(),
            current_control: ERROR_FIELD.to_string(),
            ..ControlKey::default()
        };
        Self::new(control, vec![field])
    }

    pub fn field(&self, name: &str) -> Option<&ScreenField> {
        self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }

    /// Text of a field, if present.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.field(name).map(|f| f.text.as_str())
    }

    pub fn is_quit(&self) -> bool {
        self.control.entry() == Entry::Quit
    }

    pub fn to_json(&self) -> Result<String, CicsError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, CicsError> {
        Ok(serde_json::from_str(text)?)
    }
}

impl TryFrom<Vec<ExchangeItem>> for FieldList {
    type Error = CicsError;

    fn try_from(items: Vec<ExchangeItem>) -> Result<Self, Self::Error> {
        let mut items = items.into_iter();
        let control = match items.next() {
            Some(ExchangeItem::Control(control)) => control,
            Some(ExchangeItem::Field(field)) => {
                return Err(CicsError::InvalidFieldList(format!(
                    "first element must be the control key, found field '{}'",
                    field.name
                )))
            }
            None => return Err(CicsError::InvalidFieldList("empty list".to_string())),
        };
        let fields = items
            .map(|item| match item {
                ExchangeItem::Field(field) => Ok(field),
                ExchangeItem::Control(_) => Err(CicsError::InvalidFieldList(
                    "control key may only appear first".to_string(),
                )),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { control, fields })
    }
}

impl From<FieldList> for Vec<ExchangeItem> {
    fn from(list: FieldList) -> Self {
        std::iter::once(ExchangeItem::Control(list.control))
            .chain(list.fields.into_iter().map(ExchangeItem::Field))
            .collect()
    }
}
