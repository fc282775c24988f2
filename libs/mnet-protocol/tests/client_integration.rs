//! End-to-end client scenarios against a scripted controller.
//!
//! Every test drives the real client stack (frame codec, obfuscation,
//! data-point codec, retry policy) over an in-memory channel playing the
//! turbine side of the exchange.

use std::time::Duration;

use chrono::{TimeZone, Utc};

use mnet_protocol::codec::{
    encode_multi_reply, encode_value_block, DT_ERROR, DT_I16, DT_RECORD, ERR_CODE_BAD_AVERAGING,
    SC_DIV_POW10, SC_NONE,
};
use mnet_protocol::constants::{
    reply_type, ALARM_NEVER_SECONDS, HOST_ADDRESS, REPLY_NOT_LOGGED_IN, REPLY_SERIAL_NUMBER,
    REQ_ALARM_DATA, REQ_DATA, REQ_MULTIPLE_DATA, REQ_REMOTE_LOGIN, REQ_WRITE_DATA,
    TURBINE_ADDRESS,
};
use mnet_protocol::frame;
use mnet_protocol::obfuscation::{self, ObfuscationKey};
use mnet_protocol::records::{encode_alarm_history_chunk, AlarmWireRecord, DISPLAY_BUFFER_LEN};
use mnet_protocol::testing::SharedScriptedChannel;
use mnet_protocol::types::points;
use mnet_protocol::{
    Averaging, ClientConfig, Command, DataId, EventRecord, MnetClient, MnetError, SessionState,
    Value,
};

const SERIAL: [u8; 4] = [0x00, 0xBC, 0x61, 0x4E];

fn key() -> ObfuscationKey {
    obfuscation::derive_key(SERIAL)
}

/// Obfuscate a reply body the way the controller does.
fn obf(plain: &[u8]) -> Vec<u8> {
    obfuscation::encode(plain, &key())
}

fn fast_config() -> ClientConfig {
    ClientConfig {
        timeout: Duration::from_millis(20),
        packet_send_delay: Duration::from_millis(5),
        ..ClientConfig::default()
    }
}

fn analog_block(value: i16) -> Vec<u8> {
    encode_value_block(DT_I16, SC_DIV_POW10, 1, &value.to_be_bytes())
}

async fn script_serial_reply(channel: &SharedScriptedChannel) {
    channel
        .push_reply_frame(HOST_ADDRESS, TURBINE_ADDRESS, REPLY_SERIAL_NUMBER, &SERIAL)
        .await
        .unwrap();
}

async fn script_login_ok(channel: &SharedScriptedChannel) {
    channel
        .push_reply_frame(
            HOST_ADDRESS,
            TURBINE_ADDRESS,
            reply_type(REQ_REMOTE_LOGIN),
            &[0x00],
        )
        .await
        .unwrap();
}

fn client_over(channel: &SharedScriptedChannel) -> MnetClient {
    MnetClient::new(Box::new(channel.clone()), fast_config())
}

// ============================================================================
// Session flow
// ============================================================================

#[tokio::test(start_paused = true)]
async fn full_session_serial_login_read() {
    let channel = SharedScriptedChannel::new();
    script_serial_reply(&channel).await;
    script_login_ok(&channel).await;
    channel
        .push_reply_frame(
            HOST_ADDRESS,
            TURBINE_ADDRESS,
            reply_type(REQ_DATA),
            &obf(&analog_block(123)),
        )
        .await
        .unwrap();

    let client = client_over(&channel);

    let serial = client.get_serial_number(TURBINE_ADDRESS).await.unwrap();
    assert_eq!(serial.as_u32(), 12_345_678);

    client.login(TURBINE_ADDRESS).await.unwrap();
    assert_eq!(client.state().await, SessionState::Authenticated);

    let value = client
        .request_data(TURBINE_ADDRESS, points::WIND_SPEED, Averaging::Current)
        .await
        .unwrap();
    assert_eq!(value, Value::Float64(12.3));

    // inspect what actually crossed the wire
    let writes = channel.writes().await;
    assert_eq!(writes.len(), 3);

    let serial_req = frame::parse(&writes[0]).unwrap();
    assert_eq!(serial_req.destination, TURBINE_ADDRESS);
    assert_eq!(serial_req.source, HOST_ADDRESS);
    assert!(serial_req.payload.is_empty());

    let login_req = frame::parse(&writes[1]).unwrap();
    assert_eq!(login_req.packet_type, REQ_REMOTE_LOGIN);
    assert_eq!(login_req.payload.len(), 32);
    // credential is obfuscated, never plaintext on the wire
    assert_ne!(&login_req.payload[..3], &b"131"[..]);

    let data_req = frame::parse(&writes[2]).unwrap();
    assert_eq!(data_req.packet_type, REQ_DATA);
    assert_eq!(data_req.payload, vec![0x9C, 0x43, 0x00, 0x00]);
}

#[tokio::test(start_paused = true)]
async fn login_rejection_surfaces_auth_failed() {
    let channel = SharedScriptedChannel::new();
    script_serial_reply(&channel).await;
    channel
        .push_reply_frame(
            HOST_ADDRESS,
            TURBINE_ADDRESS,
            reply_type(REQ_REMOTE_LOGIN),
            &[0x02],
        )
        .await
        .unwrap();

    let client = client_over(&channel);
    let err = client.login(TURBINE_ADDRESS).await.unwrap_err();
    assert!(matches!(err, MnetError::AuthFailed(_)));
    assert_eq!(client.state().await, SessionState::SerialKnown);
}

#[tokio::test(start_paused = true)]
async fn not_logged_in_reply_demotes_session() {
    let channel = SharedScriptedChannel::new();
    script_serial_reply(&channel).await;
    script_login_ok(&channel).await;
    channel
        .push_reply_frame(HOST_ADDRESS, TURBINE_ADDRESS, REPLY_NOT_LOGGED_IN, &[])
        .await
        .unwrap();

    let client = client_over(&channel);
    client.get_serial_number(TURBINE_ADDRESS).await.unwrap();
    client.login(TURBINE_ADDRESS).await.unwrap();

    let err = client
        .send_command(TURBINE_ADDRESS, Command::Stop)
        .await
        .unwrap_err();
    assert!(matches!(err, MnetError::Unauthenticated));
    assert_eq!(client.state().await, SessionState::SerialKnown);
}

// ============================================================================
// Retry policy
// ============================================================================

#[tokio::test(start_paused = true)]
async fn dropped_reply_is_retried_once() {
    let channel = SharedScriptedChannel::new();
    script_serial_reply(&channel).await;
    channel.push_dropped_reply().await;
    channel
        .push_reply_frame(
            HOST_ADDRESS,
            TURBINE_ADDRESS,
            reply_type(REQ_DATA),
            &obf(&analog_block(57)),
        )
        .await
        .unwrap();

    let client = client_over(&channel);
    let value = client
        .request_data(TURBINE_ADDRESS, points::ROTOR_RPM, Averaging::Current)
        .await
        .unwrap();
    assert_eq!(value, Value::Float64(5.7));
    assert_eq!(client.last_retry_count().await, 1);

    // the input buffer was cleared before every attempt
    assert!(channel.clear_count().await >= 3);
}

#[tokio::test(start_paused = true)]
async fn wrong_reply_type_is_retried() {
    let channel = SharedScriptedChannel::new();
    script_serial_reply(&channel).await;
    // first answer pairs with the wrong family
    channel
        .push_reply_frame(
            HOST_ADDRESS,
            TURBINE_ADDRESS,
            reply_type(REQ_MULTIPLE_DATA),
            &obf(&analog_block(57)),
        )
        .await
        .unwrap();
    channel
        .push_reply_frame(
            HOST_ADDRESS,
            TURBINE_ADDRESS,
            reply_type(REQ_DATA),
            &obf(&analog_block(57)),
        )
        .await
        .unwrap();

    let client = client_over(&channel);
    let value = client
        .request_data(TURBINE_ADDRESS, points::ROTOR_RPM, Averaging::Current)
        .await
        .unwrap();
    assert_eq!(value, Value::Float64(5.7));
    assert_eq!(client.last_retry_count().await, 1);
}

#[tokio::test(start_paused = true)]
async fn retry_budget_exhaustion_surfaces_last_error() {
    let channel = SharedScriptedChannel::new();
    script_serial_reply(&channel).await;
    for _ in 0..4 {
        channel.push_dropped_reply().await;
    }

    let client = client_over(&channel);
    let err = client
        .request_data(TURBINE_ADDRESS, points::ROTOR_RPM, Averaging::Current)
        .await
        .unwrap_err();
    assert!(matches!(err, MnetError::Timeout(_)));
    // state machine does not break on protocol-level failures
    assert_eq!(client.state().await, SessionState::SerialKnown);
}

#[tokio::test(start_paused = true)]
async fn reply_after_line_noise_is_accepted() {
    let channel = SharedScriptedChannel::new();
    let mut noisy = vec![0xE5; 40]; // ≥ 32 bytes of garbage before SOH
    noisy.extend(frame::build(HOST_ADDRESS, TURBINE_ADDRESS, REPLY_SERIAL_NUMBER, &SERIAL).unwrap());
    channel.push_reply(noisy).await;

    let client = client_over(&channel);
    let serial = client.get_serial_number(TURBINE_ADDRESS).await.unwrap();
    assert_eq!(serial.as_bytes(), SERIAL);
}

// ============================================================================
// Batched reads
// ============================================================================

#[tokio::test(start_paused = true)]
async fn multi_data_preserves_order() {
    let channel = SharedScriptedChannel::new();
    script_serial_reply(&channel).await;

    let reply = encode_multi_reply(&[
        (points::WIND_SPEED, 0, analog_block(123)),
        (points::L1_VOLTAGE, 5, analog_block(2415)),
        (points::ROTOR_RPM, 0, analog_block(285)),
    ]);
    channel
        .push_reply_frame(
            HOST_ADDRESS,
            TURBINE_ADDRESS,
            reply_type(REQ_MULTIPLE_DATA),
            &obf(&reply),
        )
        .await
        .unwrap();

    let client = client_over(&channel);
    let values = client
        .request_multiple_data(
            TURBINE_ADDRESS,
            &[
                (points::WIND_SPEED, Averaging::Current),
                (points::L1_VOLTAGE, Averaging::Avg1Min),
                (points::ROTOR_RPM, Averaging::Current),
            ],
        )
        .await
        .unwrap();

    assert_eq!(
        values,
        vec![
            Value::Float64(12.3),
            Value::Float64(241.5),
            Value::Float64(28.5)
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn large_batches_are_chunked_transparently() {
    let channel = SharedScriptedChannel::new();
    script_serial_reply(&channel).await;

    let items: Vec<(DataId, Averaging)> = (0..20)
        .map(|i| (DataId(0x9000 + i), Averaging::Current))
        .collect();

    let first: Vec<_> = (0..17)
        .map(|i| (DataId(0x9000 + i), 0u16, analog_block(i as i16)))
        .collect();
    let second: Vec<_> = (17..20)
        .map(|i| (DataId(0x9000 + i), 0u16, analog_block(i as i16)))
        .collect();
    for chunk in [first, second] {
        channel
            .push_reply_frame(
                HOST_ADDRESS,
                TURBINE_ADDRESS,
                reply_type(REQ_MULTIPLE_DATA),
                &obf(&encode_multi_reply(&chunk)),
            )
            .await
            .unwrap();
    }

    let client = client_over(&channel);
    let values = client
        .request_multiple_data(TURBINE_ADDRESS, &items)
        .await
        .unwrap();

    assert_eq!(values.len(), 20);
    for (i, value) in values.iter().enumerate() {
        assert_eq!(*value, Value::Float64(i as f64 / 10.0));
    }

    // serial request + exactly two chunked batch requests
    let writes = channel.writes().await;
    assert_eq!(writes.len(), 3);
    assert_eq!(frame::parse(&writes[1]).unwrap().payload[0], 17);
    assert_eq!(frame::parse(&writes[2]).unwrap().payload[0], 3);
}

#[tokio::test(start_paused = true)]
async fn missing_batch_item_is_a_protocol_error() {
    let channel = SharedScriptedChannel::new();
    script_serial_reply(&channel).await;

    // controller omits the second requested value
    let reply = encode_multi_reply(&[(points::WIND_SPEED, 0, analog_block(123))]);
    channel
        .push_reply_frame(
            HOST_ADDRESS,
            TURBINE_ADDRESS,
            reply_type(REQ_MULTIPLE_DATA),
            &obf(&reply),
        )
        .await
        .unwrap();

    let client = client_over(&channel);
    let err = client
        .request_multiple_data(
            TURBINE_ADDRESS,
            &[
                (points::WIND_SPEED, Averaging::Current),
                (points::ROTOR_RPM, Averaging::Current),
            ],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, MnetError::Protocol(_)));
}

#[tokio::test(start_paused = true)]
async fn rejected_averaging_surfaces_typed_error() {
    let channel = SharedScriptedChannel::new();
    script_serial_reply(&channel).await;
    let error_block = encode_value_block(DT_ERROR, SC_NONE, ERR_CODE_BAD_AVERAGING, &[]);
    channel
        .push_reply_frame(
            HOST_ADDRESS,
            TURBINE_ADDRESS,
            reply_type(REQ_DATA),
            &obf(&error_block),
        )
        .await
        .unwrap();

    let client = client_over(&channel);
    let err = client
        .request_data(TURBINE_ADDRESS, points::SYSTEM_PRODUCTION, Averaging::Avg20Ms)
        .await
        .unwrap_err();
    assert!(matches!(err, MnetError::UnsupportedAveraging(_)));
}

// ============================================================================
// Time
// ============================================================================

#[tokio::test(start_paused = true)]
async fn set_controller_time_writes_captured_payload() {
    let channel = SharedScriptedChannel::new();
    script_serial_reply(&channel).await;
    script_login_ok(&channel).await;
    channel
        .push_reply_frame(
            HOST_ADDRESS,
            TURBINE_ADDRESS,
            reply_type(REQ_WRITE_DATA),
            &[],
        )
        .await
        .unwrap();

    let client = client_over(&channel);
    client.get_serial_number(TURBINE_ADDRESS).await.unwrap();
    client.login(TURBINE_ADDRESS).await.unwrap();

    let t = Utc.with_ymd_and_hms(2026, 1, 16, 18, 20, 13).unwrap();
    client.set_controller_time(TURBINE_ADDRESS, t).await.unwrap();

    let writes = channel.writes().await;
    let write_req = frame::parse(writes.last().unwrap()).unwrap();
    assert_eq!(write_req.packet_type, REQ_WRITE_DATA);
    assert_eq!(
        write_req.payload,
        vec![0xC3, 0x53, 0x00, 0x01, 0x56, 0x9B, 0xDB, 0x5D]
    );
}

#[tokio::test(start_paused = true)]
async fn get_controller_time_decodes_epoch() {
    let channel = SharedScriptedChannel::new();
    script_serial_reply(&channel).await;
    let block = encode_value_block(0x07, SC_NONE, 0, &0x569BDB5Du32.to_be_bytes());
    channel
        .push_reply_frame(
            HOST_ADDRESS,
            TURBINE_ADDRESS,
            reply_type(REQ_DATA),
            &obf(&block),
        )
        .await
        .unwrap();

    let client = client_over(&channel);
    let t = client.get_controller_time(TURBINE_ADDRESS).await.unwrap();
    assert_eq!(t, Utc.with_ymd_and_hms(2026, 1, 16, 18, 20, 13).unwrap());
}

// ============================================================================
// Events
// ============================================================================

fn event_block(code: u16, text: &str) -> Vec<u8> {
    let record = EventRecord {
        index: 0,
        code,
        timestamp: Utc.with_ymd_and_hms(2026, 1, 10, 7, 30, 0).unwrap(),
        text: text.to_string(),
    };
    encode_value_block(DT_RECORD, SC_NONE, 0, &record.encode().unwrap())
}

#[tokio::test(start_paused = true)]
async fn events_batch_chunks_at_four() {
    let channel = SharedScriptedChannel::new();
    script_serial_reply(&channel).await;

    let texts = ["Grid dropout", "Auto start", "Yaw error", "Manual stop", "Auto start", "Brake test"];
    let chunk1: Vec<_> = (0u16..4)
        .map(|i| {
            (
                points::EVENT_STACK,
                i,
                event_block(100 + i, texts[i as usize]),
            )
        })
        .collect();
    let chunk2: Vec<_> = (4u16..6)
        .map(|i| {
            (
                points::EVENT_STACK,
                i,
                event_block(100 + i, texts[i as usize]),
            )
        })
        .collect();
    for chunk in [chunk1, chunk2] {
        channel
            .push_reply_frame(
                HOST_ADDRESS,
                TURBINE_ADDRESS,
                reply_type(REQ_MULTIPLE_DATA),
                &obf(&encode_multi_reply(&chunk)),
            )
            .await
            .unwrap();
    }

    let client = client_over(&channel);
    let events = client.get_events_batch(TURBINE_ADDRESS, 6).await.unwrap();

    assert_eq!(events.len(), 6);
    for (i, event) in events.iter().enumerate() {
        assert_eq!(event.index, i as u8);
        assert_eq!(event.code, 100 + i as u16);
        assert_eq!(event.text, texts[i]);
    }

    // serial + two chunked event requests
    assert_eq!(channel.writes().await.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn single_event_uses_stack_index() {
    let channel = SharedScriptedChannel::new();
    script_serial_reply(&channel).await;
    channel
        .push_reply_frame(
            HOST_ADDRESS,
            TURBINE_ADDRESS,
            reply_type(REQ_DATA),
            &obf(&event_block(412, "Grid dropout")),
        )
        .await
        .unwrap();

    let client = client_over(&channel);
    let event = client.get_event(TURBINE_ADDRESS, 3).await.unwrap();
    assert_eq!(event.index, 3);
    assert_eq!(event.code, 412);

    let writes = channel.writes().await;
    let req = frame::parse(&writes[1]).unwrap();
    assert_eq!(req.payload, vec![0x00, 0x0B, 0x00, 0x03]);
}

// ============================================================================
// Alarms
// ============================================================================

async fn script_alarm_chunks(channel: &SharedScriptedChannel, with_descriptions: bool) {
    for (i, request) in REQ_ALARM_DATA.iter().enumerate() {
        let records = vec![
            AlarmWireRecord {
                sub_id: (i as u16) * 2 + 1,
                seconds: 1_000_000 + i as u32,
                description: with_descriptions.then(|| format!("Alarm {}", i * 2 + 1)),
            },
            AlarmWireRecord {
                sub_id: (i as u16) * 2 + 2,
                seconds: ALARM_NEVER_SECONDS,
                description: with_descriptions.then(|| format!("Alarm {}", i * 2 + 2)),
            },
        ];
        channel
            .push_reply_frame(
                HOST_ADDRESS,
                TURBINE_ADDRESS,
                reply_type(*request),
                &encode_alarm_history_chunk(&records),
            )
            .await
            .unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn alarm_history_caches_descriptions() {
    let channel = SharedScriptedChannel::new();
    script_serial_reply(&channel).await;
    script_alarm_chunks(&channel, true).await;

    let client = client_over(&channel);
    let first = client
        .get_alarm_history_batch(TURBINE_ADDRESS, false)
        .await
        .unwrap();
    assert_eq!(first.len(), 8);
    assert_eq!(first[0].description, "Alarm 1");
    assert!(first[0].has_occurred);
    assert!(!first[1].has_occurred);

    // second poll: timestamps only, descriptions come from the cache
    script_alarm_chunks(&channel, false).await;
    let second = client
        .get_alarm_history_batch(TURBINE_ADDRESS, false)
        .await
        .unwrap();
    assert_eq!(second.len(), 8);
    assert_eq!(second[3].description, "Alarm 4");

    let writes = channel.writes().await;
    // serial + 4 chunks (descriptions) + 4 chunks (timestamps only)
    assert_eq!(writes.len(), 9);
    assert_eq!(frame::parse(&writes[1]).unwrap().payload, vec![0x01]);
    assert_eq!(frame::parse(&writes[5]).unwrap().payload, vec![0x00]);
}

#[tokio::test(start_paused = true)]
async fn alarm_history_filters_never_occurred() {
    let channel = SharedScriptedChannel::new();
    script_serial_reply(&channel).await;
    script_alarm_chunks(&channel, true).await;

    let client = client_over(&channel);
    let occurred = client
        .get_alarm_history_batch(TURBINE_ADDRESS, true)
        .await
        .unwrap();
    assert_eq!(occurred.len(), 4);
    assert!(occurred.iter().all(|a| a.has_occurred));
}

// ============================================================================
// Remote display
// ============================================================================

#[tokio::test(start_paused = true)]
async fn display_buffer_renders_rows() {
    let channel = SharedScriptedChannel::new();
    script_serial_reply(&channel).await;

    let mut buffer = vec![b' '; DISPLAY_BUFFER_LEN];
    buffer[..18].copy_from_slice(b"  WP3000 STATUS   ");
    buffer[18..36].copy_from_slice(b"Wind   12.3 m/s   ");
    channel
        .push_reply_frame(
            HOST_ADDRESS,
            TURBINE_ADDRESS,
            reply_type(mnet_protocol::constants::REQ_SERIAL_NUMBER),
            &buffer,
        )
        .await
        .unwrap();

    let client = client_over(&channel);
    let lines = client
        .get_remote_display_text(TURBINE_ADDRESS)
        .await
        .unwrap();
    assert_eq!(lines, vec!["  WP3000 STATUS", "Wind   12.3 m/s"]);

    // the display request selects the display variant of the family
    let writes = channel.writes().await;
    assert_eq!(frame::parse(&writes[1]).unwrap().payload, vec![0x01]);
}
