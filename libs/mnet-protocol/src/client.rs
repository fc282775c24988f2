//! The M-net client: session state machine and typed operation set.
//!
//! A client owns exactly one byte channel. The serial line is half duplex,
//! so every operation is a single request/reply transaction serialized
//! through an internal mutex; a background poller and a command injector can
//! share one client safely. Retry policy, input clearing and obfuscation are
//! handled here so callers only see typed values and typed errors.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use mnet_comlink::error::{MnetError, Result};
use mnet_comlink::{ByteChannel, LogSinks, Value};

use crate::codec;
use crate::constants::{
    reply_type, DEFAULT_ALARM_RETRIES, DEFAULT_MANUFACTURER_CODE, DEFAULT_PACKET_SEND_DELAY,
    DEFAULT_RETRIES, DEFAULT_TIMEOUT, EVENT_CHUNK, HOST_ADDRESS, LOGIN_CREDENTIAL_131,
    LOGIN_SESSION_ID, MAX_BATCH, MAX_EVENTS, REPLY_NOT_LOGGED_IN, REQ_ACK_ALARM, REQ_ALARM_CODE,
    REQ_ALARM_DATA, REQ_DATA, REQ_MULTIPLE_DATA, REQ_REMOTE_LOGIN, REQ_REMOTE_LOGOUT,
    REQ_SERIAL_NUMBER, REQ_WRITE_DATA,
};
use crate::frame::{self, MnetFrame};
use crate::obfuscation::{self, ObfuscationKey};
use crate::records::{
    parse_alarm_code_reply, parse_alarm_history_chunk, AlarmRecord, DisplayBuffer, EventRecord,
    DISPLAY_BUFFER_LEN,
};
use crate::transport::ChannelDriver;
use crate::types::{points, Averaging, Command, DataId, SerialNumber};

// ============================================================================
// Configuration
// ============================================================================

/// Tunable client policy. The defaults match the controller's tolerances.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Our node address on the link
    pub host_address: u8,
    /// Per-request reply deadline
    pub timeout: Duration,
    /// Retry budget for ordinary operations
    pub max_retries: u32,
    /// Retry budget for the alarm family
    pub max_alarm_retries: u32,
    /// Pause between retry attempts (inter-frame tolerance)
    pub packet_send_delay: Duration,
    /// Manufacturer login code selecting the credential
    pub manufacturer_code: u8,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host_address: HOST_ADDRESS,
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_RETRIES,
            max_alarm_retries: DEFAULT_ALARM_RETRIES,
            packet_send_delay: DEFAULT_PACKET_SEND_DELAY,
            manufacturer_code: DEFAULT_MANUFACTURER_CODE,
        }
    }
}

/// Session lifecycle of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No serial, no key; only serial retrieval is meaningful
    Fresh,
    /// Serial cached and key derived; reads are possible
    SerialKnown,
    /// Login accepted; all operations permitted
    Authenticated,
    /// Transport failed; `reset()` required
    Broken,
}

// ============================================================================
// Client
// ============================================================================

struct ClientInner {
    driver: ChannelDriver,
    config: ClientConfig,
    state: SessionState,
    serial: Option<SerialNumber>,
    key: Option<ObfuscationKey>,
    alarm_descriptions: HashMap<u16, String>,
    last_retries: u32,
}

/// Authenticated request/reply client for one controller session.
pub struct MnetClient {
    inner: Mutex<ClientInner>,
}

impl MnetClient {
    pub fn new(channel: Box<dyn ByteChannel>, config: ClientConfig) -> Self {
        Self::with_sinks(channel, config, LogSinks::default())
    }

    pub fn with_sinks(
        channel: Box<dyn ByteChannel>,
        config: ClientConfig,
        sinks: LogSinks,
    ) -> Self {
        Self {
            inner: Mutex::new(ClientInner {
                driver: ChannelDriver::new(channel, sinks),
                config,
                state: SessionState::Fresh,
                serial: None,
                key: None,
                alarm_descriptions: HashMap::new(),
                last_retries: 0,
            }),
        }
    }

    /// Current session state.
    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    /// Retries the most recent successful transaction needed.
    pub async fn last_retry_count(&self) -> u32 {
        self.inner.lock().await.last_retries
    }

    /// Drop all cached session material and return to `Fresh`.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        inner.state = SessionState::Fresh;
        inner.serial = None;
        inner.key = None;
        inner.alarm_descriptions.clear();
    }

    /// Like [`reset`](Self::reset), also swapping in a reconnected channel.
    pub async fn reset_with_channel(&self, channel: Box<dyn ByteChannel>) {
        let mut inner = self.inner.lock().await;
        inner.driver.replace_channel(channel);
        inner.state = SessionState::Fresh;
        inner.serial = None;
        inner.key = None;
        inner.alarm_descriptions.clear();
    }

    // ========================================================================
    // Session establishment
    // ========================================================================

    /// Retrieve (and cache) the turbine serial number, deriving the
    /// obfuscation key. The mandatory first exchange of a session.
    pub async fn get_serial_number(&self, destination: u8) -> Result<SerialNumber> {
        let mut inner = self.inner.lock().await;
        inner.ensure_serial(destination).await?;
        inner
            .serial
            .ok_or_else(|| MnetError::protocol("serial missing after fetch"))
    }

    /// Authenticate the session with the configured manufacturer code.
    pub async fn login(&self, destination: u8) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.ensure_serial(destination).await?;

        let credential = credential_block(inner.config.manufacturer_code)?;
        let encoded = obfuscation::encode(&credential, inner.key_ref()?);
        let retries = inner.config.max_retries;
        let reply = inner
            .transact(destination, REQ_REMOTE_LOGIN, &encoded, retries)
            .await?;

        match reply.payload.first() {
            None | Some(0x00) => {
                inner.state = SessionState::Authenticated;
                inner.driver.sinks().log_debug("login accepted");
                Ok(())
            },
            Some(code) => Err(MnetError::AuthFailed(format!(
                "controller rejected login, status 0x{code:02X}"
            ))),
        }
    }

    /// End the authenticated session; the controller confirms with its
    /// not-logged-in reply.
    pub async fn logout(&self, destination: u8) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let retries = inner.config.max_retries;
        inner
            .transact(destination, REQ_REMOTE_LOGOUT, &[], retries)
            .await?;
        if inner.state == SessionState::Authenticated {
            inner.state = SessionState::SerialKnown;
        }
        Ok(())
    }

    // ========================================================================
    // Data reads
    // ========================================================================

    /// Read one data point under the given averaging window.
    pub async fn request_data(
        &self,
        destination: u8,
        id: DataId,
        averaging: Averaging,
    ) -> Result<Value> {
        let mut inner = self.inner.lock().await;
        inner.ensure_serial(destination).await?;
        inner
            .read_point(destination, id, averaging.code())
            .await
    }

    /// Read several data points in one or more batched exchanges; reply
    /// order matches request order across chunk boundaries.
    pub async fn request_multiple_data(
        &self,
        destination: u8,
        items: &[(DataId, Averaging)],
    ) -> Result<Vec<Value>> {
        let mut inner = self.inner.lock().await;
        inner.ensure_serial(destination).await?;

        let wire_items: Vec<(DataId, u16)> =
            items.iter().map(|(id, avg)| (*id, avg.code())).collect();

        let mut values = Vec::with_capacity(items.len());
        for chunk in wire_items.chunks(MAX_BATCH) {
            values.extend(inner.read_points(destination, chunk).await?);
        }
        Ok(values)
    }

    // ========================================================================
    // Commands and time
    // ========================================================================

    /// Write an operational command to the controller's command register.
    pub async fn send_command(&self, destination: u8, command: Command) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.ensure_authenticated()?;

        let payload = codec::encode_write_request(&[(points::COMMAND, 0, command.code())]);
        let retries = inner.config.max_retries;
        inner
            .transact(destination, REQ_WRITE_DATA, &payload, retries)
            .await?;
        inner
            .driver
            .sinks()
            .log_debug(&format!("command {command} acknowledged"));
        Ok(())
    }

    /// Read the controller's wall clock.
    pub async fn get_controller_time(&self, destination: u8) -> Result<DateTime<Utc>> {
        let mut inner = self.inner.lock().await;
        inner.ensure_serial(destination).await?;
        let value = inner
            .read_point(destination, points::CONTROLLER_TIME, 0)
            .await?;
        value
            .as_timestamp()
            .ok_or_else(|| MnetError::protocol(format!("controller time decoded as {value:?}")))
    }

    /// Set the controller's wall clock.
    pub async fn set_controller_time(&self, destination: u8, time: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.ensure_authenticated()?;

        let seconds = codec::encode_timestamp(time)?;
        let payload = codec::encode_write_request(&[(
            points::CONTROLLER_TIME,
            points::TIME_WRITE_SUB,
            seconds,
        )]);
        let retries = inner.config.max_retries;
        inner
            .transact(destination, REQ_WRITE_DATA, &payload, retries)
            .await?;
        Ok(())
    }

    // ========================================================================
    // Remote display
    // ========================================================================

    /// Fetch the raw 138-byte remote display buffer.
    pub async fn get_remote_display(&self, destination: u8) -> Result<DisplayBuffer> {
        let mut inner = self.inner.lock().await;
        inner.ensure_serial(destination).await?;
        let retries = inner.config.max_retries;
        let reply = inner
            .transact(destination, REQ_SERIAL_NUMBER, &[0x01], retries)
            .await?;
        if reply.payload.len() != DISPLAY_BUFFER_LEN {
            return Err(MnetError::protocol(format!(
                "display reply carries {} bytes, expected {DISPLAY_BUFFER_LEN}",
                reply.payload.len()
            )));
        }
        DisplayBuffer::from_bytes(&reply.payload)
    }

    /// Fetch the display as trimmed text rows.
    pub async fn get_remote_display_text(&self, destination: u8) -> Result<Vec<String>> {
        Ok(self.get_remote_display(destination).await?.lines())
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Read one event-stack entry; index 0 is the most recent.
    pub async fn get_event(&self, destination: u8, index: u8) -> Result<EventRecord> {
        let mut inner = self.inner.lock().await;
        inner.ensure_serial(destination).await?;
        let value = inner
            .read_point(destination, points::EVENT_STACK, u16::from(index))
            .await?;
        match value {
            Value::Bytes(raw) => EventRecord::parse(index, &raw),
            other => Err(MnetError::protocol(format!(
                "event reply decoded as {other:?}"
            ))),
        }
    }

    /// Read up to `limit` events from the stack, newest first, batched at
    /// the controller's per-request event limit.
    pub async fn get_events_batch(&self, destination: u8, limit: u8) -> Result<Vec<EventRecord>> {
        let mut inner = self.inner.lock().await;
        inner.ensure_serial(destination).await?;

        let limit = usize::from(limit).min(MAX_EVENTS);
        let indices: Vec<u16> = (0..limit as u16).collect();
        let mut events = Vec::with_capacity(limit);

        for chunk in indices.chunks(EVENT_CHUNK) {
            let items: Vec<(DataId, u16)> =
                chunk.iter().map(|&i| (points::EVENT_STACK, i)).collect();
            let values = inner.read_points(destination, &items).await?;
            for (value, &index) in values.into_iter().zip(chunk) {
                match value {
                    Value::Bytes(raw) => events.push(EventRecord::parse(index as u8, &raw)?),
                    other => {
                        return Err(MnetError::protocol(format!(
                            "event {index} decoded as {other:?}"
                        )));
                    },
                }
            }
        }
        Ok(events)
    }

    // ========================================================================
    // Alarms
    // ========================================================================

    /// Fetch one alarm record by sub-id.
    pub async fn get_alarm_record(&self, destination: u8, sub_id: u16) -> Result<AlarmRecord> {
        let mut inner = self.inner.lock().await;
        inner.ensure_serial(destination).await?;
        let retries = inner.config.max_alarm_retries;
        let reply = inner
            .transact(destination, REQ_ALARM_CODE, &sub_id.to_be_bytes(), retries)
            .await?;
        let alarm = parse_alarm_code_reply(&reply.payload)?;
        if !alarm.description.is_empty() {
            inner
                .alarm_descriptions
                .insert(alarm.sub_id, alarm.description.clone());
        }
        Ok(alarm)
    }

    /// Fetch the alarm history. The first call retrieves and caches the
    /// descriptions; later calls use the cheaper timestamps-only exchange
    /// and join against the cache.
    pub async fn get_alarm_history_batch(
        &self,
        destination: u8,
        only_occurred: bool,
    ) -> Result<Vec<AlarmRecord>> {
        let mut inner = self.inner.lock().await;
        inner.ensure_serial(destination).await?;

        let want_descriptions = inner.alarm_descriptions.is_empty();
        let flag = [u8::from(want_descriptions)];
        let retries = inner.config.max_alarm_retries;

        let mut alarms = Vec::new();
        for request in REQ_ALARM_DATA {
            let reply = inner.transact(destination, request, &flag, retries).await?;
            for record in parse_alarm_history_chunk(&reply.payload)? {
                let description = match record.description {
                    Some(desc) => {
                        inner.alarm_descriptions.insert(record.sub_id, desc.clone());
                        desc
                    },
                    None => inner
                        .alarm_descriptions
                        .get(&record.sub_id)
                        .cloned()
                        .unwrap_or_default(),
                };
                alarms.push(AlarmRecord::from_wire(
                    record.sub_id,
                    record.seconds,
                    description,
                ));
            }
        }

        if only_occurred {
            alarms.retain(|a| a.has_occurred);
        }
        Ok(alarms)
    }

    /// Acknowledge an alarm on the controller.
    pub async fn acknowledge_alarm(&self, destination: u8, sub_id: u16) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.ensure_authenticated()?;
        let retries = inner.config.max_alarm_retries;
        inner
            .transact(destination, REQ_ACK_ALARM, &sub_id.to_be_bytes(), retries)
            .await?;
        Ok(())
    }
}

// ============================================================================
// Inner session logic
// ============================================================================

impl ClientInner {
    fn ensure_ready(&self) -> Result<()> {
        if self.state == SessionState::Broken {
            return Err(MnetError::NotReady);
        }
        Ok(())
    }

    fn ensure_authenticated(&self) -> Result<()> {
        self.ensure_ready()?;
        if self.state != SessionState::Authenticated {
            return Err(MnetError::Unauthenticated);
        }
        Ok(())
    }

    fn key_ref(&self) -> Result<&ObfuscationKey> {
        self.key
            .as_ref()
            .ok_or_else(|| MnetError::protocol("no obfuscation key derived yet"))
    }

    /// Fetch the serial number if this session does not hold one yet.
    async fn ensure_serial(&mut self, destination: u8) -> Result<()> {
        self.ensure_ready()?;
        if self.serial.is_some() {
            return Ok(());
        }

        let retries = self.config.max_retries;
        let reply = self
            .transact(destination, REQ_SERIAL_NUMBER, &[], retries)
            .await?;
        let bytes: [u8; 4] = reply.payload.as_slice().try_into().map_err(|_| {
            MnetError::protocol(format!(
                "serial reply carries {} bytes, expected 4",
                reply.payload.len()
            ))
        })?;

        let serial = SerialNumber(bytes);
        self.key = Some(obfuscation::derive_key(bytes));
        self.serial = Some(serial);
        if self.state == SessionState::Fresh {
            self.state = SessionState::SerialKnown;
        }
        self.driver
            .sinks()
            .log_debug(&format!("turbine serial {serial}"));
        Ok(())
    }

    /// Read one data point; deobfuscates and decodes the reply.
    async fn read_point(&mut self, destination: u8, id: DataId, sub: u16) -> Result<Value> {
        let payload = codec::encode_single_request(id, sub);
        let retries = self.config.max_retries;
        let reply = self
            .transact(destination, REQ_DATA, &payload, retries)
            .await?;
        let plain = obfuscation::decode(&reply.payload, self.key_ref()?);
        codec::decode_single_reply(&plain, id)
    }

    /// Read one batch (≤ MAX_BATCH items) of data points.
    async fn read_points(
        &mut self,
        destination: u8,
        items: &[(DataId, u16)],
    ) -> Result<Vec<Value>> {
        let payload = codec::encode_multi_request(items)?;
        let retries = self.config.max_retries;
        let reply = self
            .transact(destination, REQ_MULTIPLE_DATA, &payload, retries)
            .await?;
        let plain = obfuscation::decode(&reply.payload, self.key_ref()?);
        codec::decode_multi_reply(&plain, items)
    }

    /// One request/reply transaction with the shared retry policy.
    async fn transact(
        &mut self,
        destination: u8,
        request_type: u16,
        payload: &[u8],
        retries: u32,
    ) -> Result<MnetFrame> {
        self.ensure_ready()?;
        let expected = reply_type(request_type);
        let wire = frame::build(destination, self.config.host_address, request_type, payload)?;

        let mut last_error = MnetError::timeout("no reply");
        for attempt in 0..=retries {
            if attempt > 0 {
                debug!(
                    "retry {}/{} for type 0x{:04X}: {}",
                    attempt, retries, request_type, last_error
                );
                sleep(self.config.packet_send_delay).await;
            }

            if let Err(e) = self.driver.clear().await {
                self.state = SessionState::Broken;
                return Err(e);
            }
            if let Err(e) = self.driver.send_frame(&wire).await {
                self.state = SessionState::Broken;
                return Err(e);
            }

            let deadline = Instant::now() + self.config.timeout;
            match self.driver.receive_frame(deadline).await {
                Ok(reply) => {
                    if reply.packet_type == REPLY_NOT_LOGGED_IN && expected != REPLY_NOT_LOGGED_IN
                    {
                        // controller dropped our session
                        if self.state == SessionState::Authenticated {
                            warn!("controller reports session logged out");
                            self.state = SessionState::SerialKnown;
                        }
                        return Err(MnetError::Unauthenticated);
                    }
                    if reply.packet_type != expected {
                        last_error = MnetError::WrongReplyType {
                            expected,
                            got: reply.packet_type,
                        };
                        continue;
                    }
                    self.last_retries = attempt;
                    return Ok(reply);
                },
                Err(e) if e.is_transport() => {
                    self.state = SessionState::Broken;
                    return Err(e);
                },
                Err(e) if e.is_retryable() => {
                    last_error = e;
                    continue;
                },
                Err(e) => return Err(e),
            }
        }
        Err(last_error)
    }
}

/// Assemble the 32-byte login credential block for a manufacturer code.
fn credential_block(manufacturer_code: u8) -> Result<Vec<u8>> {
    let credential: &[u8; 20] = match manufacturer_code {
        131 => LOGIN_CREDENTIAL_131,
        other => {
            return Err(MnetError::config(format!(
                "no credential built in for manufacturer code {other}"
            )));
        },
    };

    let mut block = Vec::with_capacity(32);
    block.extend_from_slice(credential);
    block.extend_from_slice(&[0xFF, 0xFF]);
    block.extend_from_slice(&LOGIN_SESSION_ID.to_be_bytes());
    block.push(0x05);
    block.extend_from_slice(&[0u8; 5]);
    Ok(block)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{REPLY_SERIAL_NUMBER, TURBINE_ADDRESS};
    use crate::testing::{DeadChannel, ScriptedChannel};

    const SERIAL: [u8; 4] = [0x00, 0xBC, 0x61, 0x4E];

    fn fast_config() -> ClientConfig {
        ClientConfig {
            timeout: Duration::from_millis(20),
            packet_send_delay: Duration::from_millis(5),
            ..ClientConfig::default()
        }
    }

    fn serial_reply(channel: &mut ScriptedChannel) {
        channel
            .push_reply_frame(HOST_ADDRESS, TURBINE_ADDRESS, REPLY_SERIAL_NUMBER, &SERIAL)
            .unwrap();
    }

    #[test]
    fn test_credential_block_layout() {
        let block = credential_block(131).unwrap();
        assert_eq!(block.len(), 32);
        assert!(block.starts_with(LOGIN_CREDENTIAL_131));
        assert_eq!(&block[20..22], &[0xFF, 0xFF]);
        assert_eq!(&block[22..26], &[0x00, 0x00, 0x00, 0x7B]);
        assert_eq!(block[26], 0x05);
        assert_eq!(&block[27..32], &[0u8; 5]);

        assert!(credential_block(104).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_serial_fetch_transitions_state() {
        let mut channel = ScriptedChannel::new();
        serial_reply(&mut channel);
        let client = MnetClient::new(Box::new(channel), fast_config());

        assert_eq!(client.state().await, SessionState::Fresh);
        let serial = client.get_serial_number(TURBINE_ADDRESS).await.unwrap();
        assert_eq!(serial.as_u32(), 12_345_678);
        assert_eq!(client.state().await, SessionState::SerialKnown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_ops_require_login() {
        let mut channel = ScriptedChannel::new();
        serial_reply(&mut channel);
        let client = MnetClient::new(Box::new(channel), fast_config());
        client.get_serial_number(TURBINE_ADDRESS).await.unwrap();

        let err = client
            .send_command(TURBINE_ADDRESS, Command::Start)
            .await
            .unwrap_err();
        assert!(matches!(err, MnetError::Unauthenticated));

        let err = client
            .set_controller_time(TURBINE_ADDRESS, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, MnetError::Unauthenticated));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_breaks_client() {
        let client = MnetClient::new(Box::new(DeadChannel), fast_config());

        let err = client.get_serial_number(TURBINE_ADDRESS).await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(client.state().await, SessionState::Broken);

        // everything is NotReady until reset
        let err = client
            .request_data(TURBINE_ADDRESS, points::WIND_SPEED, Averaging::Current)
            .await
            .unwrap_err();
        assert!(matches!(err, MnetError::NotReady));

        client.reset().await;
        assert_eq!(client.state().await, SessionState::Fresh);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_with_channel_recovers() {
        let client = MnetClient::new(Box::new(DeadChannel), fast_config());
        let _ = client.get_serial_number(TURBINE_ADDRESS).await;
        assert_eq!(client.state().await, SessionState::Broken);

        let mut channel = ScriptedChannel::new();
        serial_reply(&mut channel);
        client.reset_with_channel(Box::new(channel)).await;
        let serial = client.get_serial_number(TURBINE_ADDRESS).await.unwrap();
        assert_eq!(serial.as_bytes(), SERIAL);
    }
}
