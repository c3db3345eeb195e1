use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use seatd::tenant::TenantManager;
use seatd::wire;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<TenantManager>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("seatd_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let tm = Arc::new(TenantManager::new(dir, 1000, None));

    let tm2 = tm.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let tm = tm2.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, tm, "seatd".to_string(), None).await;
            });
        }
    });

    (addr, tm)
}

async fn connect(addr: SocketAddr, dbname: &str) -> Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname(dbname)
        .user("host")
        .password("seatd");

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

async fn select(client: &Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

async fn error_code(client: &Client, sql: &str) -> SqlState {
    let err = client.batch_execute(sql).await.unwrap_err();
    err.code().cloned().unwrap_or_else(|| panic!("no SQLSTATE for {sql}: {err}"))
}

/// A location open 11:00-23:00 on Mondays with one section of `seats` four-tops.
async fn setup_restaurant(client: &Client, seats: usize) -> Ulid {
    let lid = Ulid::new();
    let section = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO locations (id, name, is_default) VALUES ('{lid}', 'Harbour', true);
             INSERT INTO operating_hours (day_of_week, open_time, close_time) VALUES (1, '11:00', '23:00');
             INSERT INTO seat_sections (id, location_id, name) VALUES ('{section}', '{lid}', 'Dining room');"
        ))
        .await
        .unwrap();
    for n in 1..=seats {
        client
            .batch_execute(&format!(
                "INSERT INTO seats (id, section_id, label, max_capacity) VALUES ('{}', '{section}', 'T{n}', 4)",
                Ulid::new()
            ))
            .await
            .unwrap();
    }
    lid
}

async fn book(client: &Client, lid: Ulid, party: u32, start: &str) -> Ulid {
    let id = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO reservations (id, location_id, name, party_size, start_time) \
             VALUES ('{id}', '{lid}', 'Guest', {party}, '{start}')"
        ))
        .await
        .unwrap();
    id
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn floor_plan_round_trip() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "harbour").await;
    let lid = setup_restaurant(&client, 3).await;

    let seats = select(&client, &format!("SELECT * FROM seats WHERE location_id = '{lid}'")).await;
    assert_eq!(seats.len(), 3);
    assert!(seats.iter().all(|r| r.get("status") == Some("free")));

    let sections = select(&client, "SELECT * FROM seat_sections").await;
    assert_eq!(sections.len(), 1);
    assert_eq!(sections[0].get("capacity"), Some("12"));

    let locations = select(&client, "SELECT * FROM locations").await;
    assert_eq!(locations[0].get("is_default"), Some("t"));
}

#[tokio::test]
async fn reservation_seating_lifecycle() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "lifecycle").await;
    let lid = setup_restaurant(&client, 2).await;
    let rid = book(&client, lid, 6, "2030-06-03 19:00").await;

    let n = client
        .execute(
            &format!(
                "INSERT INTO seat_allocations (reservation_id, seat_label, start_time) VALUES \
                 ('{rid}', 'T1', '2030-06-03 19:05'), ('{rid}', 'T2', '2030-06-03 19:05')"
            ),
            &[],
        )
        .await
        .unwrap();
    assert_eq!(n, 2);

    let rows = select(&client, &format!("SELECT * FROM reservations WHERE id = '{rid}'")).await;
    assert_eq!(rows[0].get("status"), Some("seated"));

    client
        .batch_execute(&format!("UPDATE reservations SET status = 'finished' WHERE id = '{rid}'"))
        .await
        .unwrap();

    let active = select(&client, &format!("SELECT * FROM seat_allocations WHERE location_id = '{lid}' AND active = true")).await;
    assert!(active.is_empty());
    let history = select(&client, &format!("SELECT * FROM seat_allocations WHERE reservation_id = '{rid}'")).await;
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|r| r.get("occupant_status") == Some("finished")));
}

#[tokio::test]
async fn taken_seat_is_a_serialization_failure() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "conflict").await;
    let lid = setup_restaurant(&client, 1).await;
    let first = book(&client, lid, 2, "2030-06-03 19:00").await;
    let second = book(&client, lid, 2, "2030-06-03 19:00").await;

    client
        .batch_execute(&format!(
            "INSERT INTO seat_allocations (reservation_id, seat_label, start_time, intent) \
             VALUES ('{first}', 'T1', '2030-06-03 19:00', 'reserve')"
        ))
        .await
        .unwrap();

    let code = error_code(
        &client,
        &format!("INSERT INTO seat_allocations (reservation_id, seat_label, start_time) VALUES ('{second}', 'T1', '2030-06-03 19:00')"),
    )
    .await;
    assert_eq!(code, SqlState::T_R_SERIALIZATION_FAILURE);
}

#[tokio::test]
async fn location_is_mandatory() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "no_location").await;
    setup_restaurant(&client, 1).await;

    let code = error_code(
        &client,
        &format!(
            "INSERT INTO reservations (id, name, party_size, start_time) VALUES ('{}', 'Guest', 2, '2030-06-03 19:00')",
            Ulid::new()
        ),
    )
    .await;
    assert_eq!(code, SqlState::SQLSERVER_REJECTED_ESTABLISHMENT_OF_SQLCONNECTION);

    let code = error_code(&client, "SELECT * FROM availability WHERE date = '2030-06-03' AND party_size = 2").await;
    assert_eq!(code, SqlState::SQLSERVER_REJECTED_ESTABLISHMENT_OF_SQLCONNECTION);
}

#[tokio::test]
async fn error_codes_follow_the_failure() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "errors").await;
    let lid = setup_restaurant(&client, 1).await;

    let bad_date = error_code(
        &client,
        &format!(
            "INSERT INTO reservations (id, location_id, party_size, start_time) VALUES ('{}', '{lid}', 2, 'next friday')",
            Ulid::new()
        ),
    )
    .await;
    assert_eq!(bad_date, SqlState::INVALID_DATETIME_FORMAT);

    let syntax = error_code(&client, "SELEKT * FROM seats").await;
    assert_eq!(syntax, SqlState::SYNTAX_ERROR);

    let missing = error_code(&client, &format!("DELETE FROM seats WHERE id = '{}'", Ulid::new())).await;
    assert_eq!(missing, SqlState::NO_DATA_FOUND);

    let oversized = error_code(
        &client,
        &format!(
            "INSERT INTO reservations (id, location_id, party_size, start_time) VALUES ('{}', '{lid}', 40, '2030-06-03 19:00')",
            Ulid::new()
        ),
    )
    .await;
    assert_eq!(oversized, SqlState::CONFIGURATION_LIMIT_EXCEEDED);
}

#[tokio::test]
async fn availability_and_capacity_check() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "availability").await;
    let lid = setup_restaurant(&client, 2).await;
    client
        .batch_execute(&format!("INSERT INTO location_capacities (location_id, total_capacity) VALUES ('{lid}', 10)"))
        .await
        .unwrap();
    book(&client, lid, 6, "2030-06-03 19:00").await;

    let slots = select(
        &client,
        &format!("SELECT * FROM availability WHERE location_id = '{lid}' AND date = '2030-06-03' AND party_size = 4"),
    )
    .await;
    let at_seven = slots.iter().find(|r| r.get("time") == Some("19:00")).unwrap();
    assert_eq!(at_seven.get("available_seats"), Some("4"));
    assert_eq!(at_seven.get("bookable"), Some("t"));

    let check = select(
        &client,
        &format!(
            "SELECT * FROM capacity_check WHERE location_id = '{lid}' AND date = '2030-06-03' AND time = '19:30' AND party_size = 5"
        ),
    )
    .await;
    assert_eq!(check[0].get("available"), Some("f"));
    assert_eq!(check[0].get("max_party_size"), Some("4"));
}

#[tokio::test]
async fn extended_protocol_binds_parameters() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "extended").await;
    let lid = setup_restaurant(&client, 1).await;

    let wid = Ulid::new().to_string();
    let lid_str = lid.to_string();
    let n = client
        .execute(
            "INSERT INTO waitlist_entries (id, location_id, name, party_size, check_in_time) VALUES ($1, $2, $3, $4, $5)",
            &[&wid, &lid_str, &"O'Neill", &"3", &"2030-06-03 12:15"],
        )
        .await
        .unwrap();
    assert_eq!(n, 1);

    let rows = select(&client, &format!("SELECT * FROM waitlist_entries WHERE id = '{wid}'")).await;
    assert_eq!(rows[0].get("name"), Some("O'Neill"));
    assert_eq!(rows[0].get("status"), Some("waiting"));
}

#[tokio::test]
async fn databases_are_separate_restaurants() {
    let (addr, _tm) = start_test_server().await;
    let a = connect(addr, "bistro_a").await;
    let b = connect(addr, "bistro_b").await;

    setup_restaurant(&a, 4).await;
    assert_eq!(select(&a, "SELECT * FROM seats").await.len(), 4);
    assert!(select(&b, "SELECT * FROM seats").await.is_empty());
    assert!(select(&b, "SELECT * FROM operating_hours").await.is_empty());
}
