//! Integration tests covering whole terminal sessions.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use open_mainframe_cics_host::aid::Aid;
use open_mainframe_cics_host::bms::{FieldControl, MapSpec};
use open_mainframe_cics_host::program::Outcome;
use open_mainframe_cics_host::terminal::protocol::SendMapOptions;
use open_mainframe_cics_host::terminal::{FieldList, ERROR_FIELD, QUIT, RETURN};
use open_mainframe_cics_host::{
    CicsError, CicsResult, ProgramRegistry, Region, RegionConfig, SessionService,
    TransactionContext,
};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Sign-on program: first turn shows the map, later turns check the user id.
fn sign_on(ctx: &mut TransactionContext) -> CicsResult<Outcome> {
    if ctx.eib.eibcalen == 0 {
        let out = ctx.symbolic_map("COSGN0A", Some("COSGN00"))?;
        ctx.send_map("COSGN0A", Some("COSGN00"), Some(out.as_bytes()), SendMapOptions::erase())?;
        return Ok(ctx.return_(Some("CT02"), Some(b"S")));
    }

    let mut input = ctx.symbolic_map("COSGN0A", Some("COSGN00"))?;
    ctx.receive_map("COSGN0A", Some("COSGN00"), input.as_bytes_mut())?;
    let user = input.get("USERID")?;
    if user.trim().is_empty() {
        let mut err = ctx.symbolic_map("ERRMAP", Some("ERRSET"))?;
        err.set("ERRMSG", "Please enter your user id")?;
        err.set("ERRCODE", "E001")?;
        ctx.send_map("ERRMAP", Some("ERRSET"), Some(err.as_bytes()), SendMapOptions::default())?;
        return Ok(ctx.return_(Some("CT02"), Some(b"S")));
    }

    let mut out = ctx.symbolic_map("COSGN0A", Some("COSGN00"))?;
    out.set("TITLE", &format!("WELCOME {}", user.trim().to_uppercase()))?;
    ctx.send_map("COSGN0A", Some("COSGN00"), Some(out.as_bytes()), SendMapOptions::erase())?;
    Ok(ctx.return_(None, None))
}

/// Holds FILE1 across a conversational receive.
fn hold_file(ctx: &mut TransactionContext) -> CicsResult<Outcome> {
    ctx.set_resource_lock("FILE1")?;
    show(ctx, "FILE1 HELD")?;
    let mut input = ctx.symbolic_map("MSGMAP", None)?;
    ctx.receive_map("MSGMAP", None, input.as_bytes_mut())?;
    ctx.remove_resource_lock("FILE1");
    Ok(ctx.return_(None, None))
}

fn wait_file(ctx: &mut TransactionContext) -> CicsResult<Outcome> {
    ctx.set_resource_lock("FILE1")?;
    show(ctx, "FILE1 ACQUIRED")?;
    Ok(ctx.return_(None, None))
}

fn link_failure(ctx: &mut TransactionContext) -> CicsResult<Outcome> {
    let mut area = b"KEEP".to_vec();
    ctx.eib.set_commarea_length(4);
    let message = match ctx.link("FAILER", &mut area, 10) {
        Ok(()) => "LINK SUCCEEDED".to_string(),
        Err(CicsError::LinkFailed { program, source }) => format!(
            "{program} {source} CALEN={} AREA={}",
            ctx.eib.eibcalen,
            String::from_utf8_lossy(&area)
        ),
        Err(other) => return Err(other),
    };
    show(ctx, &message)?;
    Ok(ctx.return_(None, None))
}

fn show(ctx: &mut TransactionContext, message: &str) -> CicsResult<()> {
    let mut out = ctx.symbolic_map("MSGMAP", None)?;
    out.set("MSG", message)?;
    ctx.send_map("MSGMAP", None, Some(out.as_bytes()), SendMapOptions::erase())
}

fn region() -> Arc<Region> {
    init_tracing();
    let mut programs = ProgramRegistry::new();
    programs.register_fn("CT02P000", sign_on);
    programs.register_fn("HOLDPGM", hold_file);
    programs.register_fn("WAITPGM", wait_file);
    programs.register_fn("LINKPGM", link_failure);
    programs.register_fn("FAILER", |ctx| Ok(ctx.abend("AEY9")));
    programs.register_fn("ABNDPGM", |ctx| Ok(ctx.abend("ASRA")));

    let mut config = RegionConfig::default()
        .with_transaction("CT02", "CT02P000")
        .with_transaction("HOLD", "HOLDPGM")
        .with_transaction("WAIT", "WAITPGM")
        .with_transaction("LINK", "LINKPGM")
        .with_transaction("ABND", "ABNDPGM");
    config.region.lock_poll_interval_ms = 20;
    config.maps.push(MapSpec {
        mapset: "COSGN00".into(),
        name: "COSGN0A".into(),
        error_map: false,
        fields: vec![
            FieldControl::new("TITLE", 1, 20, 40).autoskip().with_initial("SIGN ON"),
            FieldControl::new("USERID", 19, 43, 8).cursor(),
            FieldControl::new("PASSWD", 20, 43, 8).dark(),
            FieldControl::new("ERRMSG", 23, 1, 78).autoskip().bright(),
        ],
    });
    config.maps.push(MapSpec {
        mapset: "ERRSET".into(),
        name: "ERRMAP".into(),
        error_map: false,
        fields: vec![
            FieldControl::new("ERRMSG", 23, 1, 78).autoskip().bright(),
            FieldControl::new("ERRCODE", 24, 1, 8).autoskip(),
        ],
    });
    config.error_maps.push("ERRSET.ERRMAP".into());
    config.maps.push(MapSpec {
        mapset: "MSGSET".into(),
        name: "MSGMAP".into(),
        error_map: false,
        fields: vec![FieldControl::new("MSG", 1, 1, 79).cursor()],
    });
    Arc::new(Region::new(config, programs).unwrap())
}

fn session(region: &Arc<Region>, user: &str, terminal: &str) -> SessionService {
    let service = SessionService::new(Arc::clone(region));
    service.initialize(user, Some(terminal)).unwrap();
    service
}

#[test]
fn first_screen_publishes_initial_cursor() {
    let region = region();
    let service = session(&region, "USER01", "T001");

    let screen = service.run(FieldList::entry("CT02"));
    assert_eq!(screen.control.entry_or_key, RETURN);
    assert_eq!(screen.control.current_control, "USERID");
    assert_eq!(screen.control.current_position, 18 * 80 + 43);
    assert_eq!(screen.text("TITLE"), Some("SIGN ON"));
    assert_eq!(screen.field("PASSWD").unwrap().style, "dark");
    assert!(screen.field("TITLE").unwrap().read_only);
}

#[test]
fn pseudo_conversation_over_several_turns() {
    let region = region();
    let service = session(&region, "USER01", "T001");

    service.run(FieldList::entry("CT02"));
    let screen = service.run(
        FieldList::key(Aid::Enter)
            .with_field("USERID", "alice")
            .with_cursor("USERID"),
    );
    assert!(screen.is_quit());
    assert_eq!(screen.text("TITLE"), Some("WELCOME ALICE"));
}

#[test]
fn error_map_overlays_live_map() {
    let region = region();
    let service = session(&region, "USER01", "T001");

    service.run(FieldList::entry("CT02"));
    let screen = service.run(FieldList::key(Aid::Enter));
    assert_eq!(screen.control.entry_or_key, RETURN);
    assert_eq!(screen.fields.iter().filter(|f| f.name == "ERRMSG").count(), 1);
    assert_eq!(screen.text("ERRMSG"), Some("Please enter your user id"));
    let code = screen.field("ERRCODE").unwrap();
    assert!(code.read_only && code.autoskip);
    assert_eq!(region.maps().extra_length("COSGN00.COSGN0A"), 8 + 3);

    // the program still receives with its compiled record
    let screen = service.run(FieldList::key(Aid::Enter).with_field("USERID", "bob"));
    assert_eq!(screen.text("TITLE"), Some("WELCOME BOB"));
    assert!(screen.field("ERRCODE").is_none());
    assert_eq!(region.maps().extra_length("COSGN00.COSGN0A"), 0);
}

#[test]
fn resource_lock_blocks_second_session() {
    let region = region();
    let holder = session(&region, "USER01", "T001");
    let waiter = Arc::new(session(&region, "USER02", "T002"));

    let screen = holder.run(FieldList::entry("HOLD"));
    assert_eq!(screen.text("MSG"), Some("FILE1 HELD"));

    let (done_tx, done_rx) = mpsc::channel();
    let second = Arc::clone(&waiter);
    let handle = thread::spawn(move || {
        let screen = second.run(FieldList::entry("WAIT"));
        done_tx.send(screen).unwrap();
    });

    assert!(done_rx.recv_timeout(Duration::from_millis(300)).is_err());

    let screen = holder.run(FieldList::key(Aid::Enter));
    assert!(screen.is_quit());

    let screen = done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(screen.text("MSG"), Some("FILE1 ACQUIRED"));
    handle.join().unwrap();
    assert_eq!(region.locks().holder("FILE1"), None);
}

#[test]
fn overlapping_runs_wait_for_the_held_turn() {
    let region = region();
    let holder = session(&region, "USER01", "T001");
    let shared = Arc::new(session(&region, "USER02", "T002"));

    let screen = holder.run(FieldList::entry("HOLD"));
    assert_eq!(screen.text("MSG"), Some("FILE1 HELD"));

    let (tx, rx) = mpsc::channel();
    let first = {
        let service = Arc::clone(&shared);
        let tx = tx.clone();
        thread::spawn(move || tx.send((1, service.run(FieldList::entry("WAIT")))).unwrap())
    };
    thread::sleep(Duration::from_millis(100));
    let second = {
        let service = Arc::clone(&shared);
        thread::spawn(move || tx.send((2, service.run(FieldList::key(Aid::Enter)))).unwrap())
    };

    // the first turn is parked on FILE1 and the second queues behind it
    assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());

    holder.run(FieldList::key(Aid::Enter));

    let (id, screen) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(id, 1);
    assert_eq!(screen.text("MSG"), Some("FILE1 ACQUIRED"));
    let (id, screen) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(id, 2);
    assert!(screen.text(ERROR_FIELD).is_some());

    first.join().unwrap();
    second.join().unwrap();
    assert!(rx.try_recv().is_err());
}

#[test]
fn link_failure_wraps_cause() {
    let region = region();
    let service = session(&region, "USER01", "T001");

    let screen = service.run(FieldList::entry("LINK"));
    assert_eq!(
        screen.text("MSG"),
        Some("FAILER ABEND AEY9 in program 'FAILER' CALEN=0 AREA=KEEP")
    );
}

#[test]
fn unknown_transaction_keeps_session() {
    let region = region();
    let service = session(&region, "USER01", "T001");

    let screen = service.run(FieldList::entry("ZZZZ"));
    assert_eq!(screen.control.entry_or_key, RETURN);
    assert_eq!(screen.fields.len(), 1);
    assert!(screen.text(ERROR_FIELD).unwrap().contains("ZZZZ"));

    let screen = service.run(FieldList::entry("CT02"));
    assert_eq!(screen.control.current_control, "USERID");
}

#[test]
fn abend_ends_conversation_but_not_worker() {
    let region = region();
    let service = session(&region, "USER01", "T001");

    let screen = service.run(FieldList::entry("ABND"));
    assert_eq!(screen.control.entry_or_key, QUIT);
    assert_eq!(screen.text(ERROR_FIELD), Some("ABEND ASRA in program 'ABNDPGM'"));

    let screen = service.run(FieldList::entry("CT02"));
    assert_eq!(screen.control.entry_or_key, RETURN);
}

#[test]
fn json_payload_round_trip_through_session() {
    let region = region();
    let service = session(&region, "USER01", "T001");

    let input = FieldList::from_json(r#"[{"entryOrKey": "CT02"}]"#).unwrap();
    let screen = service.run(input);
    let json = screen.to_json().unwrap();
    assert!(json.starts_with(r#"[{"entryOrKey":"RETURN","currentControl":"USERID""#));
}

#[tokio::test]
async fn run_async_serves_turns() {
    let region = region();
    let service = session(&region, "USER01", "T001");

    let screen = service.run_async(FieldList::entry("CT02")).await;
    assert_eq!(screen.control.current_control, "USERID");
    let screen = service
        .run_async(FieldList::key(Aid::Enter).with_field("USERID", "carol"))
        .await;
    assert_eq!(screen.text("TITLE"), Some("WELCOME CAROL"));
    service.dispose();
}
