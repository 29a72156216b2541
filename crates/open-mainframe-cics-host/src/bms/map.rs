//! Map definitions and their symbolic record buffers.

use serde::{Deserialize, Serialize};

use super::{
    decode_latin1, encode_latin1, FieldAttributes, FieldControl, CURSOR_SENTINEL, LOW_VALUE,
    SLOT_OVERHEAD,
};
use crate::{CicsError, CicsResult};

/// Serializable description of a map, as loaded from configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapSpec {
    pub mapset: String,
    pub name: String,
    /// Register as an error map (sent over other maps without ERASE)
    #[serde(default)]
    pub error_map: bool,
    #[serde(default)]
    pub fields: Vec<FieldControl>,
}

/// Options of one buffer population (SEND MAP).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PopulateOptions {
    /// DATAONLY
    pub data_only: bool,
    /// ERASE
    pub erase: bool,
    /// CURSOR(position)
    pub cursor: Option<usize>,
}

/// Location of one field inside a symbolic record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotLayout {
    pub name: String,
    pub offset: usize,
    pub length: usize,
}

/// A compiled screen: ordered fields plus the backing record buffer.
#[derive(Debug, Clone)]
pub struct MapDefinition {
    mapset: String,
    name: String,
    fields: Vec<FieldControl>,
    original_field_count: usize,
    buffer: Vec<u8>,
    cursor_field: Option<String>,
    error_map: bool,
}

impl MapDefinition {
    /// Create a map. Field names must be unique within the map.
    pub fn new(
        mapset: impl Into<String>,
        name: impl Into<String>,
        fields: Vec<FieldControl>,
    ) -> CicsResult<Self> {
        let mapset = mapset.into().to_uppercase();
        let name = name.into().to_uppercase();
        if mapset.is_empty() || name.is_empty() {
            return Err(CicsError::Config("map and mapset names must not be empty".into()));
        }

        let mut fields = fields;
        for (index, field) in fields.iter().enumerate() {
            if field.name.is_empty() {
                return Err(CicsError::Config(format!(
                    "map {mapset}.{name}: field {index} has no name"
                )));
            }
            if fields[..index].iter().any(|f| f.name == field.name) {
                return Err(CicsError::Config(format!(
                    "map {mapset}.{name}: duplicate field {}",
                    field.name
                )));
            }
        }
        for field in &mut fields {
            field.name = field.name.to_uppercase();
            field.reset();
        }

        let record_len = fields.iter().map(FieldControl::slot_len).sum();
        Ok(Self {
            mapset,
            name,
            original_field_count: fields.len(),
            fields,
            buffer: vec![LOW_VALUE; record_len],
            cursor_field: None,
            error_map: false,
        })
    }

    /// Build a map from its configuration form.
    pub fn from_spec(spec: MapSpec) -> CicsResult<Self> {
        let map = Self::new(spec.mapset, spec.name, spec.fields)?;
        Ok(if spec.error_map { map.as_error_map() } else { map })
    }

    /// Mark this map as an error map.
    pub fn as_error_map(mut self) -> Self {
        self.error_map = true;
        self
    }

    pub fn mapset(&self) -> &str {
        &self.mapset
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `MAPSET.MAP`
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.mapset, self.name)
    }

    pub fn is_error_map(&self) -> bool {
        self.error_map
    }

    pub fn fields(&self) -> &[FieldControl] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldControl> {
        self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut FieldControl> {
        self.fields.iter_mut().find(|f| f.name.eq_ignore_ascii_case(name))
    }

    /// Number of fields the map was compiled with (overlay fields excluded).
    pub fn original_field_count(&self) -> usize {
        self.original_field_count
    }

    /// Record length of the compiled fields, as seen by programs.
    pub fn record_len(&self) -> usize {
        self.fields[..self.original_field_count]
            .iter()
            .map(FieldControl::slot_len)
            .sum()
    }

    /// Current buffer length, including bytes reserved for overlay fields.
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Field published as the cursor target by the last population.
    pub fn cursor_field(&self) -> Option<&str> {
        self.cursor_field.as_deref()
    }

    /// Slot layout of the compiled fields.
    pub fn layout(&self) -> Vec<SlotLayout> {
        let mut offset = 0;
        self.fields[..self.original_field_count]
            .iter()
            .map(|field| {
                let slot = SlotLayout {
                    name: field.name.clone(),
                    offset,
                    length: field.length,
                };
                offset += field.slot_len();
                slot
            })
            .collect()
    }

    /// Blank symbolic record for this map.
    pub fn symbolic(&self) -> SymbolicMap {
        SymbolicMap::new(self.qualified_name(), self.layout())
    }

    /// Number of caller bytes that line up with the buffer.
    ///
    /// A caller may hand over the full buffer, or the buffer minus the
    /// `extra` bytes reserved for overlay fields.
    pub fn accepted_len(&self, actual: usize, extra: usize) -> CicsResult<usize> {
        let full = self.buffer.len();
        if actual == full || actual + extra == full {
            Ok(actual)
        } else {
            Err(CicsError::BufferMismatch {
                map: self.qualified_name(),
                expected: full,
                actual,
            })
        }
    }

    /// Populate the map from a caller record (SEND MAP).
    ///
    /// With `source` the caller buffer is copied in first (size-checked).
    /// Then every compiled field takes its value and attributes:
    /// - unset attribute: declared attributes; value from the buffer when it
    ///   carries data and the send is not DATAONLY (or is ERASE), else the
    ///   declared initial value (DATAONLY keeps the current value)
    /// - set attribute: bright, dark, protected and modified decoded from the
    ///   attribute character; value as above
    ///
    /// The published cursor field is, in order: the field at the explicit
    /// cursor position, the first field whose Length slot holds `-1`, the
    /// declared initial-cursor field.
    pub fn set_map_field_properties(
        &mut self,
        source: Option<&[u8]>,
        extra: usize,
        options: PopulateOptions,
    ) -> CicsResult<()> {
        if let Some(source) = source {
            let count = self.accepted_len(source.len(), extra)?;
            self.buffer[..count].copy_from_slice(source);
        }

        let mut sentinel_cursor: Option<String> = None;
        let mut offset = 0;
        for field in self.fields.iter_mut().take(self.original_field_count) {
            let length_slot = i16::from_be_bytes([self.buffer[offset], self.buffer[offset + 1]]);
            let attr = self.buffer[offset + 2];
            let value_start = offset + SLOT_OVERHEAD;
            let value_bytes = &self.buffer[value_start..value_start + field.length];
            let has_data = value_bytes.iter().any(|b| *b != LOW_VALUE);

            field.attrs = if FieldAttributes::is_unset(attr) {
                field.declared
            } else {
                FieldAttributes::decode(attr, field.declared)
            };

            if has_data && (!options.data_only || options.erase) {
                field.value = slot_text(value_bytes);
            } else if !options.data_only {
                field.value = field.initial.clone();
            }
            field.received = false;

            if length_slot == CURSOR_SENTINEL && sentinel_cursor.is_none() {
                sentinel_cursor = Some(field.name.clone());
            }
            offset += field.slot_len();
        }

        let explicit = options.cursor.and_then(|position| {
            self.fields
                .iter()
                .find(|f| f.position() == position)
                .map(|f| f.name.clone())
        });
        let declared = self
            .fields
            .iter()
            .find(|f| f.initial_cursor)
            .map(|f| f.name.clone());
        self.cursor_field = explicit.or(sentinel_cursor).or(declared);
        Ok(())
    }

    /// Re-derive every slot from the live field values (after RECEIVE).
    ///
    /// Length is 0 when the value is empty or the field was neither modified
    /// nor received. The Attribute slot returns to LOW-VALUE.
    pub fn rebuild_buffer(&mut self) {
        let mut offset = 0;
        for field in &self.fields {
            let filled = !field.value.is_empty() && (field.attrs.modified || field.received);
            let length = if filled {
                field.value.chars().count().min(field.length)
            } else {
                0
            };
            let length = i16::try_from(length).unwrap_or(i16::MAX);
            self.buffer[offset..offset + 2].copy_from_slice(&length.to_be_bytes());
            self.buffer[offset + 2] = LOW_VALUE;

            let value_start = offset + SLOT_OVERHEAD;
            let slot = &mut self.buffer[value_start..value_start + field.length];
            if field.value.is_empty() {
                slot.fill(LOW_VALUE);
            } else {
                let bytes = encode_latin1(&field.formatted_value());
                slot.copy_from_slice(&bytes[..field.length]);
            }
            offset += field.slot_len();
        }
    }

    /// Caller view of the buffer, sized to the caller's record.
    pub fn record_for(&self, actual: usize, extra: usize) -> CicsResult<&[u8]> {
        let count = self.accepted_len(actual, extra)?;
        Ok(&self.buffer[..count])
    }

    /// Copy another map's field into the same-named live field.
    /// Returns false when no such field exists.
    pub fn update_from(&mut self, source: &FieldControl) -> bool {
        match self.field_mut(&source.name) {
            Some(field) => {
                field.value = source.value.clone();
                field.attrs = source.attrs;
                true
            }
            None => false,
        }
    }

    /// Append an overlay field. Returns the bytes it adds to the buffer.
    pub fn append_overlay(&mut self, mut field: FieldControl) -> usize {
        field.declared = FieldAttributes {
            protected: true,
            autoskip: true,
            ..FieldAttributes::default()
        };
        field.attrs = field.declared;
        field.initial_cursor = false;
        let added = field.slot_len();
        self.buffer.resize(self.buffer.len() + added, LOW_VALUE);
        self.fields.push(field);
        added
    }

    /// Blank the values of overlay fields.
    pub fn clear_overlay(&mut self) {
        for field in self.fields.iter_mut().skip(self.original_field_count) {
            field.value.clear();
            field.received = false;
        }
    }

    /// Remove overlay fields. Returns the bytes released from the buffer.
    pub fn drop_overlay(&mut self) -> usize {
        let record_len = self.record_len();
        let released = self.buffer.len() - record_len;
        self.fields.truncate(self.original_field_count);
        self.buffer.truncate(record_len);
        released
    }

    /// Whether any overlay field is present.
    pub fn has_overlay(&self) -> bool {
        self.fields.len() > self.original_field_count
    }

    /// Clear every live value and the record (CLEAR key).
    pub fn clear_values(&mut self) {
        for field in &mut self.fields {
            field.value.clear();
            field.received = false;
        }
        self.buffer.fill(LOW_VALUE);
        self.cursor_field = None;
    }
}

fn slot_text(bytes: &[u8]) -> String {
    decode_latin1(bytes)
        .trim_end_matches(|c| c == '\0' || c == ' ')
        .to_string()
}

/// A program's symbolic map record (the `...I`/`...O` copybook area).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolicMap {
    map: String,
    slots: Vec<SlotLayout>,
    data: Vec<u8>,
}

impl SymbolicMap {
    pub fn new(map: impl Into<String>, slots: Vec<SlotLayout>) -> Self {
        let len = slots
            .iter()
            .map(|s| s.offset + s.length + SLOT_OVERHEAD)
            .max()
            .unwrap_or(0);
        Self {
            map: map.into(),
            slots,
            data: vec![LOW_VALUE; len],
        }
    }

    fn slot(&self, name: &str) -> CicsResult<&SlotLayout> {
        self.slots
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| {
                CicsError::InvalidRequest(format!("map {} has no field {name}", self.map))
            })
    }

    /// Set a field value, blank padded and truncated to the field length.
    pub fn set(&mut self, name: &str, text: &str) -> CicsResult<()> {
        let slot = self.slot(name)?.clone();
        let mut bytes = encode_latin1(text);
        bytes.resize(slot.length, b' ');
        let start = slot.offset + SLOT_OVERHEAD;
        self.data[start..start + slot.length].copy_from_slice(&bytes[..slot.length]);
        Ok(())
    }

    /// Field value with trailing blanks and LOW-VALUEs removed.
    pub fn get(&self, name: &str) -> CicsResult<String> {
        let slot = self.slot(name)?;
        let start = slot.offset + SLOT_OVERHEAD;
        Ok(slot_text(&self.data[start..start + slot.length]))
    }

    /// Length slot (`...L`).
    pub fn length(&self, name: &str) -> CicsResult<i16> {
        let slot = self.slot(name)?;
        Ok(i16::from_be_bytes([
            self.data[slot.offset],
            self.data[slot.offset + 1],
        ]))
    }

    /// Ask for the cursor on a field (`...L = -1`).
    pub fn set_cursor(&mut self, name: &str) -> CicsResult<()> {
        let offset = self.slot(name)?.offset;
        self.data[offset..offset + 2].copy_from_slice(&CURSOR_SENTINEL.to_be_bytes());
        Ok(())
    }

    /// Set the attribute slot (`...A`), usually a DFHBMSCA constant.
    pub fn set_attribute(&mut self, name: &str, attr: u8) -> CicsResult<()> {
        let offset = self.slot(name)?.offset;
        self.data[offset + 2] = attr;
        Ok(())
    }

    pub fn attribute(&self, name: &str) -> CicsResult<u8> {
        let offset = self.slot(name)?.offset;
        Ok(self.data[offset + 2])
    }

    /// Reset the record to LOW-VALUE.
    pub fn clear(&mut self) {
        self.data.fill(LOW_VALUE);
    }

    /// Load record bytes, as many as fit.
    pub fn load(&mut self, bytes: &[u8]) {
        let count = bytes.len().min(self.data.len());
        self.data[..count].copy_from_slice(&bytes[..count]);
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bms::dfhbmsca;

    fn signon_map() -> MapDefinition {
        MapDefinition::new(
            "COSGN00",
            "COSGN0A",
            vec![
                FieldControl::new("TITLE", 1, 30, 20)
                    .autoskip()
                    .bright()
                    .with_initial("SIGN ON"),
                FieldControl::new("USERID", 19, 43, 8).cursor(),
                FieldControl::new("PASSWD", 20, 43, 8).dark(),
                FieldControl::new("ERRMSG", 23, 1, 78).autoskip().bright(),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_buffer_length_invariant() {
        let map = signon_map();
        assert_eq!(map.buffer_len(), (20 + 3) + (8 + 3) + (8 + 3) + (78 + 3));
        assert_eq!(map.record_len(), map.buffer_len());
        assert_eq!(map.qualified_name(), "COSGN00.COSGN0A");
        assert_eq!(map.symbolic().len(), map.record_len());
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let result = MapDefinition::new(
            "S",
            "M",
            vec![FieldControl::new("A", 1, 1, 1), FieldControl::new("a", 1, 2, 1)],
        );
        assert!(matches!(result, Err(CicsError::Config(_))));
    }

    #[test]
    fn test_size_mismatch_is_error() {
        let mut map = signon_map();
        let short = vec![0u8; 10];
        let err = map
            .set_map_field_properties(Some(&short), 0, PopulateOptions::default())
            .unwrap_err();
        assert!(matches!(err, CicsError::BufferMismatch { actual: 10, .. }));
    }

    #[test]
    fn test_unset_attribute_uses_defaults() {
        let mut map = signon_map();
        let mut record = map.symbolic();
        record.set("USERID", "ALICE").unwrap();
        record.set_attribute("TITLE", b'_').unwrap();
        map.set_map_field_properties(Some(record.as_bytes()), 0, PopulateOptions::default())
            .unwrap();

        let title = map.field("TITLE").unwrap();
        assert_eq!(title.attrs, title.declared);
        assert_eq!(title.value, "SIGN ON");
        assert_eq!(map.field("USERID").unwrap().value, "ALICE");
    }

    #[test]
    fn test_set_attribute_decoded() {
        let mut map = signon_map();
        let mut record = map.symbolic();
        record.set_attribute("USERID", dfhbmsca::UNPROT_BRT).unwrap();
        map.set_map_field_properties(Some(record.as_bytes()), 0, PopulateOptions::default())
            .unwrap();
        let userid = map.field("USERID").unwrap();
        assert!(userid.attrs.bright);
        assert!(!userid.attrs.protected);
        assert!(!userid.attrs.modified);
    }

    #[test]
    fn test_data_only_keeps_current_value() {
        let mut map = signon_map();
        let mut record = map.symbolic();
        record.set("USERID", "FIRST").unwrap();
        map.set_map_field_properties(Some(record.as_bytes()), 0, PopulateOptions::default())
            .unwrap();

        let blank = map.symbolic();
        let data_only = PopulateOptions {
            data_only: true,
            ..Default::default()
        };
        map.set_map_field_properties(Some(blank.as_bytes()), 0, data_only)
            .unwrap();
        assert_eq!(map.field("USERID").unwrap().value, "FIRST");
    }

    #[test]
    fn test_cursor_sentinel_beats_declared_cursor() {
        let mut map = signon_map();
        map.set_map_field_properties(None, 0, PopulateOptions::default())
            .unwrap();
        assert_eq!(map.cursor_field(), Some("USERID"));

        let mut record = map.symbolic();
        record.set_cursor("PASSWD").unwrap();
        map.set_map_field_properties(Some(record.as_bytes()), 0, PopulateOptions::default())
            .unwrap();
        assert_eq!(map.cursor_field(), Some("PASSWD"));
    }

    #[test]
    fn test_explicit_position_beats_sentinel() {
        let mut map = signon_map();
        let mut record = map.symbolic();
        record.set_cursor("PASSWD").unwrap();
        let options = PopulateOptions {
            cursor: Some(map.field("ERRMSG").unwrap().position()),
            ..Default::default()
        };
        map.set_map_field_properties(Some(record.as_bytes()), 0, options)
            .unwrap();
        assert_eq!(map.cursor_field(), Some("ERRMSG"));
    }

    #[test]
    fn test_rebuild_after_input() {
        let mut map = signon_map();
        map.set_map_field_properties(None, 0, PopulateOptions::default())
            .unwrap();
        {
            let userid = map.field_mut("USERID").unwrap();
            userid.value = "BOB".to_string();
            userid.attrs.modified = true;
        }
        map.rebuild_buffer();

        let mut record = map.symbolic();
        record.load(map.buffer());
        assert_eq!(record.get("USERID").unwrap(), "BOB");
        assert_eq!(record.length("USERID").unwrap(), 3);
        assert_eq!(record.length("PASSWD").unwrap(), 0);
        // unmodified initial value is not reported as input
        assert_eq!(record.length("TITLE").unwrap(), 0);
        assert_eq!(record.attribute("USERID").unwrap(), LOW_VALUE);
    }

    #[test]
    fn test_overlay_lifecycle() {
        let mut map = signon_map();
        let base = map.buffer_len();
        let added = map.append_overlay(FieldControl::new("MSGLINE", 24, 1, 40));
        assert_eq!(added, 43);
        assert_eq!(map.buffer_len(), base + 43);
        assert!(map.has_overlay());
        assert!(map.field("MSGLINE").unwrap().attrs.autoskip);

        // caller still holds the compiled record length
        assert!(map.accepted_len(base, added).is_ok());
        assert!(map.accepted_len(base + added, added).is_ok());
        assert!(map.accepted_len(base - 1, added).is_err());

        assert_eq!(map.drop_overlay(), 43);
        assert_eq!(map.buffer_len(), base);
        assert!(!map.has_overlay());
    }
}
