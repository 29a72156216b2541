//! Terminal field protocol: symbolic maps to named screen fields and back.
//!
//! SEND MAP populates the shared map from the program's record and lists its
//! fields with their style and the cursor target. An error map sent without
//! ERASE over a different active map is overlaid onto that map instead of
//! replacing it. RECEIVE MAP copies the client's fields into the map and
//! rebuilds the program's record.

use tracing::debug;

use super::{ControlKey, FieldList, ScreenField, RETURN};
use crate::bms::{lock_map, MapDefinition, MapLibrary, PopulateOptions, SharedMap};
use crate::CicsResult;

/// SEND MAP options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendMapOptions {
    pub erase: bool,
    pub data_only: bool,
    /// Send the map without program data
    pub map_only: bool,
    /// Explicit cursor position
    pub cursor: Option<usize>,
    pub alarm: bool,
}

impl SendMapOptions {
    pub fn erase() -> Self {
        Self {
            erase: true,
            ..Self::default()
        }
    }

    pub fn data_only() -> Self {
        Self {
            data_only: true,
            ..Self::default()
        }
    }

    pub fn with_cursor(mut self, position: usize) -> Self {
        self.cursor = Some(position);
        self
    }

    pub fn with_alarm(mut self) -> Self {
        self.alarm = true;
        self
    }
}

/// Send a map. `active` holds the qualified name of the map on screen and is
/// updated unless the send is an overlay.
pub fn send(
    library: &MapLibrary,
    active: &mut Option<String>,
    mapset: &str,
    map: &str,
    record: Option<&[u8]>,
    options: SendMapOptions,
) -> CicsResult<FieldList> {
    let shared = library.get(mapset, map)?;
    let source = if options.map_only { None } else { record };
    let populate = PopulateOptions {
        data_only: options.data_only,
        erase: options.erase,
        cursor: options.cursor,
    };

    let (qualified, is_error_map) = {
        let def = lock_map(&shared);
        (def.qualified_name(), def.is_error_map())
    };
    if let Some(live) = active.as_deref() {
        if is_error_map && !options.erase && live != qualified {
            let live = live.to_string();
            return overlay(library, &live, &shared, source, populate, options.alarm);
        }
    }

    let mut def = lock_map(&shared);
    if options.erase && def.has_overlay() {
        let released = def.drop_overlay();
        library.clear_extra_length(&qualified);
        debug!(map = %qualified, released, "Dropped error overlay");
    }
    let extra = library.extra_length(&qualified);
    def.set_map_field_properties(source, extra, populate)?;
    *active = Some(qualified);
    Ok(compose(&def, options.alarm))
}

/// Lay an error map over the live map.
fn overlay(
    library: &MapLibrary,
    live_name: &str,
    error_map: &SharedMap,
    source: Option<&[u8]>,
    populate: PopulateOptions,
    alarm: bool,
) -> CicsResult<FieldList> {
    // The error map is copied and released before the live map is locked.
    let error_fields = {
        let mut def = lock_map(error_map);
        def.set_map_field_properties(source, 0, populate)?;
        def.fields().to_vec()
    };

    let (mapset, map) = live_name.split_once('.').unwrap_or((live_name, ""));
    let live = library.get(mapset, map)?;
    let mut def = lock_map(&live);
    let mut added = 0;
    for field in error_fields {
        if !def.update_from(&field) {
            added += def.append_overlay(field);
        }
    }
    if added > 0 {
        library.add_extra_length(live_name, added);
    }
    debug!(map = %live_name, added, "Applied error overlay");
    Ok(compose(&def, alarm))
}

/// Screen fields of a populated map.
pub fn compose(def: &MapDefinition, alarm: bool) -> FieldList {
    let fields = def
        .fields()
        .iter()
        .map(|field| ScreenField {
            name: field.name.clone(),
            text: field.value.clone(),
            read_only: field.is_read_only(),
            length: field.length,
            style: field.style(),
            modified: field.attrs.modified,
            autoskip: field.attrs.autoskip,
        })
        .collect();

    let cursor = def.cursor_field().and_then(|name| def.field(name));
    let control = ControlKey {
        entry_or_key: RETURN.to_string(),
        current_control: cursor.map(|f| f.name.clone()).unwrap_or_default(),
        current_position: cursor.map(|f| f.position()).unwrap_or(0),
        alarm,
    };
    FieldList::new(control, fields)
}

/// Result of a receive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Received {
    /// Fields whose value was taken from the input
    pub fields: usize,
    /// Position of the field named by `currentControl`
    pub cursor_position: Option<usize>,
}

/// Receive a map: apply the client's fields and rebuild `record`.
pub fn receive(
    library: &MapLibrary,
    mapset: &str,
    map: &str,
    input: &FieldList,
    record: &mut [u8],
) -> CicsResult<Received> {
    let shared = library.get(mapset, map)?;
    let mut def = lock_map(&shared);
    let qualified = def.qualified_name();
    let extra = library.extra_length(&qualified);
    // Check the caller record before touching the map.
    def.accepted_len(record.len(), extra)?;

    let mut received = Received::default();
    for incoming in &input.fields {
        let Some(field) = def.field_mut(&incoming.name) else {
            continue;
        };
        if incoming.modified {
            field.value = incoming.text.clone();
            field.attrs.modified = true;
            field.received = true;
            received.fields += 1;
        } else if field.value != incoming.text {
            field.value = incoming.text.clone();
            field.received = true;
            received.fields += 1;
        }
    }
    def.clear_overlay();

    let current = input.control.current_control.trim();
    if !current.is_empty() {
        received.cursor_position = def.field(current).map(|f| f.position());
    }

    def.rebuild_buffer();
    let bytes = def.record_for(record.len(), extra)?;
    record.copy_from_slice(bytes);
    Ok(received)
}

/// Clear the values of the active map (CLEAR and ESCAPE keys).
pub fn clear_active(library: &MapLibrary, active: Option<&str>) -> CicsResult<()> {
    let Some(name) = active else {
        return Ok(());
    };
    let (mapset, map) = name.split_once('.').unwrap_or((name, ""));
    let shared = library.get(mapset, map)?;
    lock_map(&shared).clear_values();
    Ok(())
}
