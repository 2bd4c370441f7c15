use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use netdoc::audit::AuditLog;
use netdoc::engine::Engine;
use netdoc::wire;

// ── Test infrastructure ──────────────────────────────────────

struct TestServer {
    addr: SocketAddr,
    transfer_dir: PathBuf,
}

fn scratch_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("netdoc_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

async fn start_test_server(transfer_dir: PathBuf) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let wal = scratch_dir().join("netdoc.wal");
    let engine = Arc::new(Engine::new(wal, Arc::new(AuditLog::new(1000))).unwrap());

    let dir = transfer_dir.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = engine.clone();
            let dir = dir.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine, dir, auth(), None).await;
            });
        }
    });

    TestServer { addr, transfer_dir }
}

fn auth() -> wire::SharedPassword {
    wire::SharedPassword::new(Some("netdoc".to_string()), "netdoc".to_string())
}

fn config(addr: SocketAddr, password: &str) -> Config {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("netdoc")
        .user("netdoc")
        .password(password);
    config
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, connection) = config(addr, "netdoc").connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

async fn rows(client: &Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|msg| match msg {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

fn sqlstate(err: &tokio_postgres::Error) -> Option<&str> {
    err.code().map(|c| c.code())
}

/// A location with one 10U rack. Returns the rack id.
async fn seed_rack(client: &Client) -> Ulid {
    let location = Ulid::new();
    let rack = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO locations (id, name, door_number) VALUES ('{location}', 'Server Room', 'B12');
             INSERT INTO racks (id, name, location_id, total_units) VALUES ('{rack}', 'R1', '{location}', 10)"
        ))
        .await
        .unwrap();
    rack
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn overlapping_rack_units_report_exclusion_violation() {
    let server = start_test_server(scratch_dir()).await;
    let client = connect(server.addr).await;
    let rack = seed_rack(&client).await;

    client
        .batch_execute(&format!(
            "INSERT INTO switches (id, name, rack_id, start_unit, units_occupied) VALUES ('{}', 'SW1', '{rack}', 1, 2)",
            Ulid::new()
        ))
        .await
        .unwrap();

    let err = client
        .batch_execute(&format!(
            "INSERT INTO switches (id, name, rack_id, start_unit, units_occupied) VALUES ('{}', 'SW2', '{rack}', 2, 2)",
            Ulid::new()
        ))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some("23P01"));
    let message = err.as_db_error().map(|e| e.message().to_string()).unwrap_or_default();
    assert!(message.contains("Switch SW1 (occupies units 1-2)"), "{message}");

    let switches = rows(&client, "SELECT * FROM switches").await;
    assert_eq!(switches.len(), 1);
    assert_eq!(switches[0].get("name"), Some("SW1"));
}

#[tokio::test]
async fn rack_layout_and_port_views() {
    let server = start_test_server(scratch_dir()).await;
    let client = connect(server.addr).await;
    let rack = seed_rack(&client).await;
    let (sw, pp, pc, conn) = (Ulid::new(), Ulid::new(), Ulid::new(), Ulid::new());

    client
        .batch_execute(&format!(
            "INSERT INTO switches (id, name, rack_id, start_unit, units_occupied, total_ports) VALUES ('{sw}', 'SW1', '{rack}', 1, 2, 8);
             INSERT INTO patch_panels (id, name, total_ports) VALUES ('{pp}', 'PP1', 12);
             INSERT INTO pcs (id, name) VALUES ('{pc}', 'Workstation-A');
             INSERT INTO connections (id, pc_id, switch_id, switch_port, hops) VALUES
                ('{conn}', '{pc}', '{sw}', '3', '[{{\"patch_panel_id\":\"{pp}\",\"patch_panel_port\":\"12\"}}]')"
        ))
        .await
        .unwrap();

    let units = rows(&client, &format!("SELECT * FROM rack_units WHERE rack_id = '{rack}'")).await;
    assert_eq!(units.len(), 10);
    assert_eq!(units[1].get("device_name"), Some("SW1"));
    assert_eq!(units[2].get("device_name"), None);

    let ports = rows(&client, &format!("SELECT * FROM switch_ports WHERE switch_id = '{sw}'")).await;
    assert_eq!(ports.len(), 8);
    assert_eq!(ports[2].get("connected_by_pc"), Some("Workstation-A"));

    let hops = rows(&client, &format!("SELECT * FROM connection_hops WHERE connection_id = '{conn}'")).await;
    assert_eq!(hops.len(), 1);
    assert_eq!(hops[0].get("patch_panel_port"), Some("12"));

    // The panel port is now taken.
    let other_pc = Ulid::new();
    client
        .batch_execute(&format!("INSERT INTO pcs (id, name) VALUES ('{other_pc}', 'Workstation-B')"))
        .await
        .unwrap();
    let err = client
        .batch_execute(&format!(
            "INSERT INTO connections (id, pc_id, switch_id, switch_port, hops) VALUES
                ('{}', '{other_pc}', '{sw}', '4', '[{{\"patch_panel_id\":\"{pp}\",\"patch_panel_port\":\"12\"}}]')",
            Ulid::new()
        ))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some("23P01"));

    let available = rows(&client, "SELECT * FROM available_pcs").await;
    let names: Vec<_> = available.iter().filter_map(|r| r.get("name")).collect();
    assert_eq!(names, vec!["Workstation-B"]);
}

#[tokio::test]
async fn shrinking_rack_under_a_device_is_refused() {
    let server = start_test_server(scratch_dir()).await;
    let client = connect(server.addr).await;
    let rack = seed_rack(&client).await;
    client
        .batch_execute(&format!(
            "INSERT INTO switches (id, name, rack_id, start_unit, units_occupied) VALUES ('{}', 'SW1', '{rack}', 5, 2)",
            Ulid::new()
        ))
        .await
        .unwrap();

    let err = client
        .batch_execute(&format!("UPDATE racks SET total_units = 5 WHERE id = '{rack}'"))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some("23P01"));

    let racks = rows(&client, &format!("SELECT * FROM racks WHERE id = '{rack}'")).await;
    assert_eq!(racks[0].get("total_units"), Some("10"));
}

#[tokio::test]
async fn referenced_rows_cannot_be_deleted() {
    let server = start_test_server(scratch_dir()).await;
    let client = connect(server.addr).await;
    let rack = seed_rack(&client).await;
    client
        .batch_execute(&format!(
            "INSERT INTO patch_panels (id, name, rack_id, start_unit) VALUES ('{}', 'PP1', '{rack}', 1)",
            Ulid::new()
        ))
        .await
        .unwrap();

    let err = client
        .batch_execute(&format!("DELETE FROM racks WHERE id = '{rack}'"))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some("23503"));
}

#[tokio::test]
async fn csv_export_then_import_into_a_fresh_server() {
    let dir = scratch_dir();
    let first = start_test_server(dir.clone()).await;
    let client = connect(first.addr).await;
    let rack = seed_rack(&client).await;
    let racks = rows(&client, "SELECT * FROM racks").await;
    let location = racks[0].get("location_id").unwrap().to_string();
    client
        .batch_execute(&format!(
            "INSERT INTO switches (id, name, location_id, rack_id, start_unit, units_occupied, model) \
             VALUES ('{}', 'SW1', '{location}', '{rack}', 3, 1, 'C9300')",
            Ulid::new()
        ))
        .await
        .unwrap();
    for table in ["locations", "racks", "switches"] {
        client
            .batch_execute(&format!("COPY {table} TO '{table}.csv'"))
            .await
            .unwrap();
    }
    assert!(first.transfer_dir.join("switches.csv").exists());

    let second = start_test_server(dir).await;
    let client = connect(second.addr).await;
    for table in ["locations", "racks", "switches"] {
        let report = rows(&client, &format!("COPY {table} FROM '{table}.csv'")).await;
        assert_eq!(report[0].get("success_count"), Some("1"), "{table}");
        assert_eq!(report[0].get("error_count"), Some("0"), "{table}");
    }

    let switches = rows(&client, "SELECT * FROM switches").await;
    assert_eq!(switches.len(), 1);
    assert_eq!(switches[0].get("start_unit"), Some("3"));
    assert_eq!(switches[0].get("model"), Some("C9300"));
}

#[tokio::test]
async fn copy_rejects_paths_outside_the_transfer_dir() {
    let server = start_test_server(scratch_dir()).await;
    let client = connect(server.addr).await;
    let err = client
        .batch_execute("COPY switches TO '../switches.csv'")
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some("22023"));
}

#[tokio::test]
async fn unknown_table_is_undefined_table() {
    let server = start_test_server(scratch_dir()).await;
    let client = connect(server.addr).await;
    let err = client.simple_query("SELECT * FROM bookings").await.unwrap_err();
    assert_eq!(sqlstate(&err), Some("42P01"));
}

#[tokio::test]
async fn every_mutation_lands_in_the_audit_log() {
    let server = start_test_server(scratch_dir()).await;
    let client = connect(server.addr).await;
    let location = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO locations (id, name) VALUES ('{location}', 'Lab');
             UPDATE locations SET door_number = '7' WHERE id = '{location}';
             DELETE FROM locations WHERE id = '{location}'"
        ))
        .await
        .unwrap();

    let audit = rows(&client, "SELECT * FROM audit_log").await;
    let actions: Vec<_> = audit.iter().filter_map(|r| r.get("action")).collect();
    assert_eq!(actions, vec!["create", "update", "delete"]);
}

#[tokio::test]
async fn wrong_password_is_rejected() {
    let server = start_test_server(scratch_dir()).await;
    assert!(config(server.addr, "hunter2").connect(NoTls).await.is_err());
}

#[tokio::test]
async fn unknown_user_is_rejected() {
    let server = start_test_server(scratch_dir()).await;
    let mut config = config(server.addr, "netdoc");
    config.user("mallory");
    assert!(config.connect(NoTls).await.is_err());
}
