//! The 600-series pump driver: session establishment and the request loops.
//!
//! Connection sequence: read the stick's device-info frame, enter the ASCII
//! control mode, switch the stick into passthrough, open the radio
//! connection with the pairing digest, read the MAC pair and the link key,
//! negotiate a radio channel, then enter Extended High Speed Mode. Every
//! request that expects an application answer first consumes exactly one
//! 0x81 ack frame, then polls 0x80 frames until one carries an expected
//! ComD message type; stray 0x80 frames are logged and dropped.

use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Local};
use tracing::{debug, error, info, warn};

use crate::comd::{self, ComdCommand, ComdResponse};
use crate::constants::{
    CHANNELS, CNL_READ_TIMEOUT_MS, ERROR_CLEAR_TIMEOUT_MS, MULTIPACKET_SEGMENT_RETRY,
    PRESEND_CLEAR_TIMEOUT_MS, READ_TIMEOUT_MS,
};
use crate::crypto;
use crate::envelope::{CnlEnvelope, CommandType};
use crate::error::CnlError;
use crate::events::{self, HistoryEvent};
use crate::history::{self, HistoryDataType, HistoryRangeType};
use crate::multipacket::MultipacketSession;
use crate::responses::{
    BasalPattern, HistoryInfoResponse, InitiateMultipacket, MultipacketSegment,
    PumpStatusResponse, PumpTimeResponse, ReadInfoResponse,
};
use crate::session::{PairingStore, PumpSession};
use crate::time;
use crate::transport::{
    self, DeviceInfoFrame, UsbHidDevice, ascii, is_astm_frame, is_lost_connection,
    is_no_pump_response, is_nonstandard_network_connect, is_receive_buffer_full,
};

/// Result of probing one radio channel. Rejection is an expected outcome of
/// the scan, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationOutcome {
    Accepted { channel: u8, rssi_percent: u8 },
    Rejected,
}

/// Message types that may legitimately arrive during a bulk transfer.
const TRANSFER_MESSAGES: &[ComdCommand] = &[
    ComdCommand::InitiateMultipacketTransfer,
    ComdCommand::MultipacketSegmentTransmission,
    ComdCommand::MultipacketResendPackets,
    ComdCommand::EndHistoryTransmission,
    ComdCommand::HighSpeedMode,
    ComdCommand::Nak,
];

pub struct PumpDevice<D: UsbHidDevice> {
    transport: D,
    pub session: PumpSession,
    /// UTC offset reported by the pump clock, used to encode request dates.
    pump_time_offset: i64,
}

impl<D: UsbHidDevice> PumpDevice<D> {
    pub fn new(transport: D) -> Self {
        Self {
            transport,
            session: PumpSession::new(""),
            pump_time_offset: 0,
        }
    }

    /// Run the whole connection sequence up to EHSM, consulting the pairing
    /// store for the last good radio channel and writing it back on success.
    pub fn connect(&mut self, store: &mut dyn PairingStore) -> Result<(), CnlError> {
        self.request_device_info()?;
        info!(serial = self.session.stick_serial(), "stick identified");
        self.enter_control_mode()?;
        self.enter_passthrough_mode()?;
        self.open_connection()?;
        self.request_read_info()?;
        self.read_link_key()?;

        let mut record = store.load(self.session.stick_serial())?;
        match self.negotiate_channel(record.last_radio_channel)? {
            NegotiationOutcome::Accepted {
                channel,
                rssi_percent,
            } => {
                info!(channel, rssi_percent, "radio channel negotiated");
                record.last_radio_channel = channel;
                store.save(self.session.stick_serial(), &record)?;
            }
            NegotiationOutcome::Rejected => {
                self.disconnect();
                return Err(CnlError::NegotiationFailed);
            }
        }
        self.begin_ehsm()?;
        Ok(())
    }

    /// Best-effort teardown in the reverse order of connect. Errors are
    /// logged, not surfaced; the stick resets its side on close anyway.
    pub fn disconnect(&mut self) {
        if let Err(err) = self.finish_ehsm() {
            warn!(%err, "finish EHSM failed during teardown");
        }
        if let Err(err) = self.close_connection() {
            warn!(%err, "close connection failed during teardown");
        }
        if let Err(err) = self.exit_passthrough_mode() {
            warn!(%err, "exit passthrough failed during teardown");
        }
        if let Err(err) = self.exit_control_mode() {
            warn!(%err, "exit control mode failed during teardown");
        }
    }

    fn read_message(&mut self, timeout_ms: u64) -> Result<Vec<u8>, CnlError> {
        transport::read_message(&mut self.transport, Duration::from_millis(timeout_ms))
    }

    /// Drain unsolicited frames before a send or after an error. The stick
    /// resends responses it thinks were missed; leaving them queued wedges it
    /// into an E86 needing a replug.
    pub fn clear_message(&mut self, timeout_ms: u64) -> Result<u32, CnlError> {
        let mut count = 0u32;
        loop {
            match self.read_message(timeout_ms) {
                Ok(message) => {
                    count += 1;
                    if is_no_pump_response(&message) {
                        warn!("cleared stream at 'no pump response' frame");
                        break;
                    }
                    if is_lost_connection(&message) {
                        warn!("cleared stream at 'lost connection' frame");
                        break;
                    }
                    if is_nonstandard_network_connect(&message) {
                        warn!("cleared stream at non-standard network connect frame");
                        break;
                    }
                }
                Err(CnlError::TransportTimeout(_)) => break,
                Err(err) => return Err(err),
            }
        }
        if count > 0 {
            warn!(count, "cleared queued messages");
        }
        Ok(count)
    }

    fn send(&mut self, payload: &[u8]) -> Result<(), CnlError> {
        self.clear_message(PRESEND_CLEAR_TIMEOUT_MS)?;
        transport::send_message(&mut self.transport, payload)
    }

    /// Every request gets exactly one 0x81 ack from the stick before any
    /// application response. Losing it usually ends with the stick in an
    /// error state, so a timeout here is not retried.
    fn read_response_0x81(&mut self, timeout_ms: u64) -> Result<Vec<u8>, CnlError> {
        let payload = loop {
            let payload = match self.read_message(timeout_ms) {
                Ok(payload) => payload,
                Err(CnlError::TransportTimeout(_)) => {
                    error!("timeout waiting for 0x81 response");
                    return Err(CnlError::TransportTimeout("0x81 response"));
                }
                Err(err) => return Err(err),
            };
            if payload.len() < 0x21 {
                warn!(len = payload.len(), "undersized frame while waiting for 0x81");
            } else if payload[0x12] != 0x81 {
                warn!(command = payload[0x12], "frame is not a 0x81, dropped");
            } else {
                break payload;
            }
        };

        if payload.len() <= 0x21 {
            self.clear_message(ERROR_CLEAR_TIMEOUT_MS)?;
            return Err(CnlError::ConnectionLost("empty 0x81 response"));
        }
        let announced = 0x21 + (payload[0x1C] as usize | (payload[0x1D] as usize) << 8);
        if payload.len() != announced {
            self.clear_message(ERROR_CLEAR_TIMEOUT_MS)?;
            return Err(CnlError::InvalidFrame("0x81 size mismatch".into()));
        }
        if payload[0x21] != 0x55 {
            self.clear_message(ERROR_CLEAR_TIMEOUT_MS)?;
            return Err(CnlError::ConnectionLost("0x81 without 0x55 payload"));
        }
        if payload.len() == 0x30 {
            match payload[0x2D] {
                0x02 => {}
                0x04 => warn!("0x81 reports noisy/busy radio"),
                state => {
                    error!(state, "0x81 with unknown state flag");
                    self.clear_message(ERROR_CLEAR_TIMEOUT_MS)?;
                    return Err(CnlError::InvalidFrame("0x81 unknown state flag".into()));
                }
            }
        } else if payload.len() == 0x27 && payload[0x23] == 0x00 && payload[0x24] == 0x00 {
            warn!("0x81 reports network not connected");
        }
        Ok(payload)
    }

    /// Poll for the next 0x80 frame, skipping buffer-full noise and raising
    /// on the documented dead-connection shapes.
    fn read_response_0x80(&mut self, timeout_ms: u64) -> Result<CnlEnvelope, CnlError> {
        let payload = loop {
            let payload = self.read_message(timeout_ms)?;
            if is_receive_buffer_full(&payload) {
                debug!("stick receive buffer full, reading again");
                continue;
            }
            break payload;
        };

        if payload.len() <= 0x21 {
            self.clear_message(ERROR_CLEAR_TIMEOUT_MS)?;
            return Err(CnlError::InvalidFrame("0x80 response too short".into()));
        }
        if payload[0x12] != 0x80 {
            self.clear_message(ERROR_CLEAR_TIMEOUT_MS)?;
            return Err(CnlError::UnexpectedMessageType {
                expected: vec![0x80],
                actual: payload[0x12] as u16,
            });
        }
        let announced = 0x21 + (payload[0x1C] as usize | (payload[0x1D] as usize) << 8);
        if payload.len() != announced {
            self.clear_message(ERROR_CLEAR_TIMEOUT_MS)?;
            return Err(CnlError::InvalidFrame("0x80 size mismatch".into()));
        }
        if payload.len() == 0x22 {
            // single-byte internal payload, the stick is about to E86
            return Err(CnlError::ConnectionLost("1-byte 0x80 internal payload"));
        }
        if payload[0x21] != 0x55 {
            error!("0x80 without internal 0x55 payload");
            self.clear_message(ERROR_CLEAR_TIMEOUT_MS)?;
            return Err(CnlError::ConnectionLost("0x80 without 0x55 payload"));
        }

        if is_no_pump_response(&payload) {
            warn!("pump did not respond");
            return Err(CnlError::ConnectionLost("no response from pump"));
        }
        if is_lost_connection(&payload) {
            error!("pump connection lost");
            self.clear_message(ERROR_CLEAR_TIMEOUT_MS)?;
            return Err(CnlError::ConnectionLost("lost pump connection"));
        }
        if is_nonstandard_network_connect(&payload) {
            error!("non-standard network connect, connection lost");
            return Err(CnlError::ConnectionLost("non-standard network connect"));
        }

        CnlEnvelope::decode(&payload)
    }

    /// Poll 0x80 frames until one decrypts to an expected ComD message type.
    /// The pump is free to interleave unsolicited frames; they are logged and
    /// dropped.
    fn get_comd_message(
        &mut self,
        expected: &[ComdCommand],
        timeout_ms: u64,
    ) -> Result<ComdResponse, CnlError> {
        loop {
            let envelope = self.read_response_0x80(timeout_ms)?;
            let response = ComdResponse::decode(&self.session, &envelope.payload)?;
            let command = response.command();
            if expected.contains(&command) {
                return Ok(response);
            }
            warn!(
                got = format!("{:#06x}", u16::from(command)),
                "unexpected ComD message while polling, dropped"
            );
        }
    }

    /// Send a ComD request and consume its 0x81 ack.
    fn send_comd(&mut self, command: ComdCommand, payload: &[u8]) -> Result<(), CnlError> {
        let inner = comd::encode_comd_request(&mut self.session, command, payload)?;
        let frame = CnlEnvelope::encode(&mut self.session, CommandType::SendMessage, &inner);
        self.send(&frame)?;
        self.read_response_0x81(READ_TIMEOUT_MS)?;
        Ok(())
    }

    /// Ask for the stick's device-info frame (ASCII `X`) and extract the
    /// serial that keys the pairing store. The frame and the ENQ control
    /// byte arrive in either order.
    pub fn request_device_info(&mut self) -> Result<(), CnlError> {
        debug!("reading device info");
        for _ in 0..4 {
            self.send(&[0x58])?;
            let first = match self.read_message(READ_TIMEOUT_MS) {
                Ok(message) => message,
                Err(CnlError::TransportTimeout(_)) => {
                    self.send(&[ascii::EOT])?;
                    continue;
                }
                Err(err) => return Err(err),
            };
            let second = self.read_message(READ_TIMEOUT_MS)?;

            let (astm, control) = if is_astm_frame(&first) {
                (first, second)
            } else if is_astm_frame(&second) {
                (second, first)
            } else {
                return Err(CnlError::InvalidFrame(format!(
                    "expected a device info frame, got {}",
                    hex::encode(&first)
                )));
            };
            if control.first() != Some(&ascii::ENQ) {
                return Err(CnlError::InvalidFrame(
                    "device info without ENQ control frame".into(),
                ));
            }
            let info = DeviceInfoFrame::decode(&astm)?;
            self.session.set_stick_serial(info.stick_serial()?);
            return Ok(());
        }
        Err(CnlError::TransportTimeout("device info frame"))
    }

    fn check_control_message(&mut self, expected: u8) -> Result<(), CnlError> {
        let message = self.read_message(READ_TIMEOUT_MS)?;
        if !message.is_empty() && message[0] != expected {
            error!(
                expected,
                got = message[0],
                "unexpected control character"
            );
            return Err(CnlError::InvalidFrame(format!(
                "expected control character {expected:#04x}, got {:#04x}",
                message[0]
            )));
        }
        Ok(())
    }

    pub fn enter_control_mode(&mut self) -> Result<(), CnlError> {
        debug!("entering control mode");
        self.send(&[ascii::NAK])?;
        self.check_control_message(ascii::EOT)?;
        self.send(&[ascii::ENQ])?;
        self.check_control_message(ascii::ACK)
    }

    pub fn exit_control_mode(&mut self) -> Result<(), CnlError> {
        debug!("exiting control mode");
        self.send(&[ascii::EOT])?;
        self.check_control_message(ascii::ENQ)
    }

    pub fn enter_passthrough_mode(&mut self) -> Result<(), CnlError> {
        debug!("entering passthrough mode");
        for message in [b"W|", b"Q|", b"1|"] {
            self.send(message)?;
            self.check_control_message(ascii::ACK)?;
        }
        Ok(())
    }

    pub fn exit_passthrough_mode(&mut self) -> Result<(), CnlError> {
        debug!("exiting passthrough mode");
        for message in [b"W|", b"Q|", b"0|"] {
            self.send(message)?;
            self.check_control_message(ascii::ACK)?;
        }
        Ok(())
    }

    /// OPEN_CONNECTION carries the pairing digest; the stick echoes a frame
    /// that needs no inspection.
    pub fn open_connection(&mut self) -> Result<(), CnlError> {
        debug!("opening connection");
        let hmac = self.session.pairing_hmac();
        let frame = CnlEnvelope::encode(&mut self.session, CommandType::OpenConnection, &hmac);
        self.send(&frame)?;
        self.read_message(READ_TIMEOUT_MS)?;
        Ok(())
    }

    pub fn close_connection(&mut self) -> Result<(), CnlError> {
        debug!("closing connection");
        let hmac = self.session.pairing_hmac();
        let frame = CnlEnvelope::encode(&mut self.session, CommandType::CloseConnection, &hmac);
        self.send(&frame)?;
        self.read_message(READ_TIMEOUT_MS)?;
        Ok(())
    }

    /// READ_INFO returns the link/pump MAC pair that seeds the session.
    pub fn request_read_info(&mut self) -> Result<(), CnlError> {
        debug!("reading radio info");
        let frame = CnlEnvelope::encode(&mut self.session, CommandType::ReadInfo, &[]);
        self.send(&frame)?;
        let message = self.read_message(READ_TIMEOUT_MS)?;
        let envelope = CnlEnvelope::decode(&message)?;
        let info = ReadInfoResponse::new(envelope.payload)?;
        self.session.link_mac = info.link_mac();
        self.session.pump_mac = info.pump_mac();
        info!(
            link_mac = format!("{:#x}", self.session.link_mac),
            pump_mac = format!("{:#x}", self.session.pump_mac),
            "radio info read"
        );
        Ok(())
    }

    /// REQUEST_LINK_KEY, then run the unpacking walk keyed by the stick
    /// serial.
    pub fn read_link_key(&mut self) -> Result<(), CnlError> {
        debug!("reading link key");
        let frame = CnlEnvelope::encode(&mut self.session, CommandType::RequestLinkKey, &[]);
        self.send(&frame)?;
        let message = self.read_message(READ_TIMEOUT_MS)?;
        let envelope = CnlEnvelope::decode(&message)?;
        let key = crypto::unpack_link_key(&envelope.payload, self.session.stick_serial())?;
        self.session.set_key(key);
        Ok(())
    }

    /// Probe the session's current radio channel with a JOIN_NETWORK
    /// message. The channel is taken only if the 0x80 response echoes the
    /// same channel byte.
    fn probe_channel(&mut self) -> Result<NegotiationOutcome, CnlError> {
        let join = comd::encode_join_network(&mut self.session);
        let frame = CnlEnvelope::encode(&mut self.session, CommandType::SendMessage, &join);
        self.send(&frame)?;
        self.read_response_0x81(READ_TIMEOUT_MS)?;
        let response = self.read_response_0x80(READ_TIMEOUT_MS)?;
        if response.payload.len() <= 0x0D {
            return Ok(NegotiationOutcome::Rejected);
        }
        let echoed = response.payload[0x2B];
        if echoed != self.session.radio_channel {
            return Err(CnlError::UnexpectedMessageType {
                expected: vec![self.session.radio_channel as u16],
                actual: echoed as u16,
            });
        }
        let rssi_percent = ((response.payload[0x1A] as u32 * 100) / 0xA8) as u8;
        Ok(NegotiationOutcome::Accepted {
            channel: echoed,
            rssi_percent,
        })
    }

    /// Scan the last good channel first, then the fixed list the CareLink
    /// applet uses. Rejection of every candidate is reported as an outcome so
    /// the caller may retry later.
    pub fn negotiate_channel(&mut self, preferred: u8) -> Result<NegotiationOutcome, CnlError> {
        debug!("negotiating pump radio channel");
        for channel in std::iter::once(preferred).chain(CHANNELS) {
            debug!(channel = format!("{channel:#04x}"), "probing channel");
            self.session.radio_channel = channel;
            match self.probe_channel()? {
                NegotiationOutcome::Accepted {
                    channel,
                    rssi_percent,
                } => {
                    self.session.radio_rssi_percent = rssi_percent;
                    return Ok(NegotiationOutcome::Accepted {
                        channel,
                        rssi_percent,
                    });
                }
                NegotiationOutcome::Rejected => {}
            }
        }
        self.session.radio_channel = 0;
        Ok(NegotiationOutcome::Rejected)
    }

    /// Begin the high-speed session. Only an 0x81 ack comes back.
    pub fn begin_ehsm(&mut self) -> Result<(), CnlError> {
        debug!("beginning extended high speed mode");
        let inner = comd::encode_comd_request(&mut self.session, ComdCommand::HighSpeedMode, &[0x00])?;
        let frame = CnlEnvelope::encode(&mut self.session, CommandType::SendMessage, &inner);
        self.send(&frame)?;
        self.read_response_0x81(READ_TIMEOUT_MS)?;
        Ok(())
    }

    /// Finish the high-speed session. Only an 0x81 ack comes back.
    pub fn finish_ehsm(&mut self) -> Result<(), CnlError> {
        debug!("finishing extended high speed mode");
        let inner = comd::encode_comd_request(&mut self.session, ComdCommand::HighSpeedMode, &[0x01])?;
        let frame = CnlEnvelope::encode(&mut self.session, CommandType::SendMessage, &inner);
        self.send(&frame)?;
        self.read_response_0x81(READ_TIMEOUT_MS)?;
        Ok(())
    }

    pub fn get_pump_time(&mut self) -> Result<PumpTimeResponse, CnlError> {
        debug!("reading pump time");
        self.send_comd(ComdCommand::TimeRequest, &[])?;
        let response = self.get_comd_message(&[ComdCommand::TimeResponse], READ_TIMEOUT_MS)?;
        let view = PumpTimeResponse::from_response(&response)?;
        self.pump_time_offset = view.offset()?;
        Ok(view)
    }

    pub fn get_pump_status(&mut self) -> Result<PumpStatusResponse, CnlError> {
        debug!("reading pump status");
        self.send_comd(ComdCommand::ReadPumpStatusRequest, &[])?;
        let response =
            self.get_comd_message(&[ComdCommand::ReadPumpStatusResponse], READ_TIMEOUT_MS)?;
        PumpStatusResponse::from_response(&response)
    }

    pub fn get_carb_ratios(&mut self) -> Result<crate::responses::CarbRatiosResponse, CnlError> {
        debug!("reading bolus wizard carb ratios");
        self.send_comd(ComdCommand::ReadCarbRatiosRequest, &[])?;
        let response =
            self.get_comd_message(&[ComdCommand::ReadCarbRatiosResponse], READ_TIMEOUT_MS)?;
        crate::responses::CarbRatiosResponse::from_response(&response)
    }

    pub fn get_bg_targets(&mut self) -> Result<crate::responses::BgTargetsResponse, CnlError> {
        debug!("reading bolus wizard BG targets");
        self.send_comd(ComdCommand::ReadBgTargetsRequest, &[])?;
        let response =
            self.get_comd_message(&[ComdCommand::ReadBgTargetsResponse], READ_TIMEOUT_MS)?;
        crate::responses::BgTargetsResponse::from_response(&response)
    }

    pub fn get_sensitivity_factors(
        &mut self,
    ) -> Result<crate::responses::SensitivityFactorsResponse, CnlError> {
        debug!("reading bolus wizard sensitivity factors");
        self.send_comd(ComdCommand::ReadSensitivityFactorsRequest, &[])?;
        let response = self.get_comd_message(
            &[ComdCommand::ReadSensitivityFactorsResponse],
            READ_TIMEOUT_MS,
        )?;
        crate::responses::SensitivityFactorsResponse::from_response(&response)
    }

    fn history_request_payload(
        &self,
        start: DateTime<Local>,
        end: DateTime<Local>,
        data_type: HistoryDataType,
    ) -> Vec<u8> {
        let from_rtc = time::rtc_from_date(start, self.pump_time_offset);
        let to_rtc = time::rtc_from_date(end, self.pump_time_offset);
        let mut payload = vec![data_type.into(), HistoryRangeType::PartialHistory.into()];
        payload.extend_from_slice(&from_rtc.to_be_bytes());
        payload.extend_from_slice(&to_rtc.to_be_bytes());
        payload.extend_from_slice(&0u16.to_be_bytes());
        payload
    }

    pub fn get_history_info(
        &mut self,
        start: DateTime<Local>,
        end: DateTime<Local>,
        data_type: HistoryDataType,
    ) -> Result<HistoryInfoResponse, CnlError> {
        debug!("reading history info");
        let payload = self.history_request_payload(start, end, data_type);
        self.send_comd(ComdCommand::ReadHistoryInfoRequest, &payload)?;
        let response =
            self.get_comd_message(&[ComdCommand::ReadHistoryInfoResponse], READ_TIMEOUT_MS)?;
        HistoryInfoResponse::from_response(&response)
    }

    fn ack_multipacket(&mut self, command: ComdCommand) -> Result<(), CnlError> {
        self.send_comd(ComdCommand::AckMultipacket, &u16::from(command).to_be_bytes())
    }

    fn request_resend(&mut self, start: u16, count: u16) -> Result<(), CnlError> {
        debug!(start, count, "requesting multipacket resend");
        let mut payload = Vec::with_capacity(4);
        payload.extend_from_slice(&start.to_be_bytes());
        payload.extend_from_slice(&count.to_be_bytes());
        self.send_comd(ComdCommand::MultipacketResendPackets, &payload)
    }

    /// Pull raw history segments for the date range. Each returned buffer is
    /// one reassembled multipacket transfer (a compressed history blob).
    pub fn get_history(
        &mut self,
        start: DateTime<Local>,
        end: DateTime<Local>,
        data_type: HistoryDataType,
    ) -> Result<Vec<Bytes>, CnlError> {
        debug!("reading pump history");
        let payload = self.history_request_payload(start, end, data_type);
        self.send_comd(ComdCommand::ReadHistoryRequest, &payload)?;

        let mut segments: Vec<Bytes> = Vec::new();
        let mut transfer: Option<MultipacketSession> = None;
        let mut expected_outstanding = 0u16;
        let mut retry = 0u32;

        loop {
            let collecting = transfer
                .as_ref()
                .filter(|session| !session.payload_complete());

            let response = if let Some(session) = collecting {
                if expected_outstanding < 1 {
                    let (start, missing) = session.missing_segments();
                    self.request_resend(start, missing)?;
                    expected_outstanding = missing;
                }
                // a transfer that never got going waits the full timeout in
                // case the pump missed the initial ack
                let timeout = if session.segments_filled() == 0 {
                    READ_TIMEOUT_MS
                } else {
                    session.read_timeout_ms(expected_outstanding)
                };
                match self.get_comd_message(TRANSFER_MESSAGES, timeout) {
                    Ok(response) => {
                        retry = 0;
                        response
                    }
                    Err(CnlError::TransportTimeout(_)) => {
                        retry += 1;
                        if session.stalled_beyond_recovery() || retry >= MULTIPACKET_SEGMENT_RETRY {
                            self.clear_message(ERROR_CLEAR_TIMEOUT_MS)?;
                            error!(
                                filled = session.segments_filled(),
                                of = session.packets_to_fetch(),
                                retry,
                                "multipacket transfer stalled beyond recovery"
                            );
                            return Err(CnlError::MultipacketIntegrity(format!(
                                "stalled with {}/{} segments after {retry} retries",
                                session.segments_filled(),
                                session.packets_to_fetch()
                            )));
                        }
                        warn!(
                            filled = session.segments_filled(),
                            of = session.packets_to_fetch(),
                            retry,
                            "multipacket read timed out, requesting repair"
                        );
                        expected_outstanding = 0;
                        continue;
                    }
                    Err(err) => return Err(err),
                }
            } else {
                self.get_comd_message(TRANSFER_MESSAGES, READ_TIMEOUT_MS)?
            };

            match response.command() {
                ComdCommand::Nak => {
                    self.clear_message(ERROR_CLEAR_TIMEOUT_MS)?;
                    let nak = crate::responses::NakResponse::from_response(&response)?;
                    warn!(
                        command = format!("{:#06x}", nak.nak_command()?),
                        code = nak.nak_code()?,
                        "pump sent a NAK"
                    );
                }
                ComdCommand::HighSpeedMode => {
                    debug!("consumed high speed mode status during transfer");
                }
                ComdCommand::InitiateMultipacketTransfer => {
                    let init = InitiateMultipacket::from_response(&response)?;
                    let session = MultipacketSession::new(&init)?;
                    expected_outstanding = session.packets_to_fetch();
                    transfer = Some(session);
                    self.ack_multipacket(ComdCommand::InitiateMultipacketTransfer)?;
                }
                ComdCommand::MultipacketSegmentTransmission => {
                    let Some(session) = transfer.as_mut() else {
                        warn!("segment before transfer initiation, dropped");
                        continue;
                    };
                    if session.payload_complete() {
                        debug!("transfer already complete, segment not needed");
                        continue;
                    }
                    let segment = MultipacketSegment::from_response(&response)?;
                    if session.add_segment(&segment)? {
                        expected_outstanding = expected_outstanding.saturating_sub(1);
                    }
                    if session.payload_complete() {
                        info!("multipacket transfer complete");
                        self.ack_multipacket(ComdCommand::MultipacketSegmentTransmission)?;
                        segments.push(session.assemble()?);
                        transfer = None;
                    }
                }
                ComdCommand::EndHistoryTransmission => {
                    debug!("history transmission ended");
                    break;
                }
                other => {
                    warn!(
                        command = format!("{:#06x}", u16::from(other)),
                        "unhandled message during history transfer"
                    );
                }
            }
        }
        Ok(segments)
    }

    /// Pull and fully decode history for the date range: segments are
    /// decompressed, block-verified and parsed into the event stream.
    pub fn read_history_events(
        &mut self,
        start: DateTime<Local>,
        end: DateTime<Local>,
        data_type: HistoryDataType,
    ) -> Result<Vec<HistoryEvent>, CnlError> {
        let segments = self.get_history(start, end, data_type)?;
        let mut blocks = Vec::new();
        for segment in &segments {
            blocks.extend(history::decode_history_segment(segment, data_type)?);
        }
        Ok(events::decode_blocks(&blocks))
    }

    /// Read one basal pattern. The response arrives either as a plain
    /// READ_BASAL_PATTERN_RESPONSE or through the multipacket machinery.
    pub fn get_basal_pattern(&mut self, pattern_number: u8) -> Result<BasalPattern, CnlError> {
        debug!(pattern_number, "reading basal pattern");
        self.send_comd(ComdCommand::ReadBasalPatternRequest, &[pattern_number])?;

        const PATTERN_MESSAGES: &[ComdCommand] = &[
            ComdCommand::InitiateMultipacketTransfer,
            ComdCommand::MultipacketSegmentTransmission,
            ComdCommand::MultipacketResendPackets,
            ComdCommand::EndHistoryTransmission,
            ComdCommand::ReadBasalPatternResponse,
            ComdCommand::HighSpeedMode,
            ComdCommand::Nak,
        ];

        let mut transfer: Option<MultipacketSession> = None;
        let mut expected_outstanding = 0u16;

        loop {
            let collecting = transfer
                .as_ref()
                .filter(|session| !session.payload_complete());
            let timeout = match collecting {
                Some(session) if session.segments_filled() > 0 => {
                    session.read_timeout_ms(expected_outstanding)
                }
                _ => READ_TIMEOUT_MS,
            };
            if let Some(session) = collecting {
                if expected_outstanding < 1 {
                    let (start, missing) = session.missing_segments();
                    self.request_resend(start, missing)?;
                    expected_outstanding = missing;
                }
            }

            let response = self.get_comd_message(PATTERN_MESSAGES, timeout)?;
            match response.command() {
                ComdCommand::ReadBasalPatternResponse => {
                    return BasalPattern::parse(&response.payload[1..]);
                }
                ComdCommand::InitiateMultipacketTransfer => {
                    let init = InitiateMultipacket::from_response(&response)?;
                    let session = MultipacketSession::new(&init)?;
                    expected_outstanding = session.packets_to_fetch();
                    transfer = Some(session);
                    self.ack_multipacket(ComdCommand::InitiateMultipacketTransfer)?;
                }
                ComdCommand::MultipacketSegmentTransmission => {
                    let Some(session) = transfer.as_mut() else {
                        warn!("segment before transfer initiation, dropped");
                        continue;
                    };
                    let segment = MultipacketSegment::from_response(&response)?;
                    if session.add_segment(&segment)? {
                        expected_outstanding = expected_outstanding.saturating_sub(1);
                    }
                    if session.payload_complete() {
                        self.ack_multipacket(ComdCommand::MultipacketSegmentTransmission)?;
                        let assembled = session.assemble()?;
                        return BasalPattern::parse(&assembled);
                    }
                }
                ComdCommand::HighSpeedMode => {
                    let status = crate::responses::EhsmStatus::from_response(&response)?;
                    if status.mode()? != 0 {
                        return Err(CnlError::UnexpectedMessageType {
                            expected: vec![u16::from(ComdCommand::ReadBasalPatternResponse)],
                            actual: u16::from(ComdCommand::HighSpeedMode),
                        });
                    }
                }
                ComdCommand::Nak => {
                    self.clear_message(ERROR_CLEAR_TIMEOUT_MS)?;
                    return Err(CnlError::UnexpectedMessageType {
                        expected: vec![u16::from(ComdCommand::ReadBasalPatternResponse)],
                        actual: u16::from(ComdCommand::Nak),
                    });
                }
                other => {
                    warn!(
                        command = format!("{:#06x}", u16::from(other)),
                        "unhandled message during basal pattern read"
                    );
                }
            }
        }
    }

    /// Read all eight patterns the pump stores.
    pub fn get_all_basal_patterns(&mut self) -> Result<Vec<BasalPattern>, CnlError> {
        (1..=8).map(|n| self.get_basal_pattern(n)).collect()
    }

    /// Clear timeout used by callers recovering from an error state.
    pub fn clear_after_error(&mut self) -> Result<u32, CnlError> {
        self.clear_message(CNL_READ_TIMEOUT_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comd::CRC16;
    use crate::envelope::EnvelopeHeader;
    use crate::session::MemoryPairingStore;
    use std::collections::VecDeque;
    use zerocopy::IntoBytes;
    use zerocopy::byteorder::little_endian::U32;

    /// Scripted transport. `Timeout` entries absorb the pre-send clears and
    /// model silent radio gaps.
    enum Step {
        Report(Vec<u8>),
        Timeout,
    }

    struct ScriptedDevice {
        steps: VecDeque<Step>,
        writes: Vec<Vec<u8>>,
    }

    impl ScriptedDevice {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                steps: steps.into(),
                writes: Vec::new(),
            }
        }
    }

    impl UsbHidDevice for ScriptedDevice {
        fn read_report(&mut self, _timeout: Duration) -> Result<Vec<u8>, CnlError> {
            match self.steps.pop_front() {
                Some(Step::Report(report)) => Ok(report),
                Some(Step::Timeout) | None => Err(CnlError::TransportTimeout("usb report")),
            }
        }

        fn write_report(&mut self, report: &[u8]) -> Result<(), CnlError> {
            self.writes.push(report.to_vec());
            Ok(())
        }
    }

    /// Chunk one logical message into 64-byte reports.
    fn reports(message: &[u8]) -> Vec<Step> {
        message
            .chunks(60)
            .map(|chunk| {
                let mut report = Vec::with_capacity(64);
                report.extend_from_slice(b"ABC");
                report.push(chunk.len() as u8);
                report.extend_from_slice(chunk);
                report.resize(64, 0);
                Step::Report(report)
            })
            .collect()
    }

    /// Build an incoming envelope frame with a valid checksum.
    fn incoming_frame(command: u8, payload: &[u8]) -> Vec<u8> {
        let header = EnvelopeHeader {
            frame_type: 0x51,
            frame_subtype: 0x03,
            pump_serial: *b"000000",
            reserved_a: [0; 10],
            command,
            sequence: U32::new(1),
            reserved_b: [0; 5],
            payload_len: U32::new(payload.len() as u32),
        };
        let mut frame = header.as_bytes().to_vec();
        let checksum = frame
            .iter()
            .chain(payload.iter())
            .fold(0u8, |acc, b| acc.wrapping_add(*b));
        frame.push(checksum);
        frame.extend_from_slice(payload);
        frame
    }

    /// A minimal passing 0x81 ack: 0x30 bytes with the 0x55 marker and the
    /// 0x02 state flag.
    fn ack_0x81() -> Vec<u8> {
        let mut payload = vec![0u8; 0x0F];
        payload[0x00] = 0x55;
        payload[0x01] = 0x0D;
        payload[0x03] = 0x04;
        payload[0x0C] = 0x02;
        incoming_frame(0x81, &payload)
    }

    /// Wrap an encrypted ComD response payload in the full 0x80 envelope.
    fn comd_0x80(session: &PumpSession, command: ComdCommand, body: &[u8]) -> Vec<u8> {
        let mut clear = vec![0x21];
        clear.extend_from_slice(&u16::from(command).to_be_bytes());
        clear.extend_from_slice(body);
        let crc = CRC16.checksum(&clear);
        clear.extend_from_slice(&crc.to_be_bytes());

        let mut radio_envelope = vec![0u8; 22];
        radio_envelope[0] = 0x55;
        let mut inner = radio_envelope;
        inner.extend_from_slice(&session.encrypt(&clear).unwrap());

        // incoming radio messages lead with 0x55, not a command action
        let mut link = vec![0x55, (inner.len() + 2) as u8];
        link.extend_from_slice(&inner);
        let crc = CRC16.checksum(&link);
        link.extend_from_slice(&crc.to_le_bytes());

        incoming_frame(0x80, &link)
    }

    fn keyed_device(steps: Vec<Step>) -> PumpDevice<ScriptedDevice> {
        let mut device = PumpDevice::new(ScriptedDevice::new(steps));
        device.session.set_stick_serial("6229-1234567");
        device.session.set_key([0x42; 16]);
        device.session.radio_channel = 0x14;
        device
    }

    #[test]
    fn control_mode_handshake() {
        let mut steps = vec![Step::Timeout];
        steps.extend(reports(&[ascii::EOT]));
        steps.push(Step::Timeout);
        steps.extend(reports(&[ascii::ACK]));
        let mut device = PumpDevice::new(ScriptedDevice::new(steps));
        device.enter_control_mode().unwrap();
        // NAK then ENQ went out
        assert_eq!(device.transport.writes[0][4], ascii::NAK);
        assert_eq!(device.transport.writes[1][4], ascii::ENQ);
    }

    #[test]
    fn control_mode_rejects_wrong_ack() {
        let mut steps = vec![Step::Timeout];
        steps.extend(reports(&[ascii::ACK])); // EOT expected
        let mut device = PumpDevice::new(ScriptedDevice::new(steps));
        assert!(matches!(
            device.enter_control_mode(),
            Err(CnlError::InvalidFrame(_))
        ));
    }

    #[test]
    fn read_info_seeds_the_macs() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&0x0023F7_0000001122u64.to_be_bytes());
        payload.extend_from_slice(&0x0023F7_0000003344u64.to_be_bytes());
        let mut steps = vec![Step::Timeout];
        steps.extend(reports(&incoming_frame(0x14, &payload)));
        let mut device = PumpDevice::new(ScriptedDevice::new(steps));
        device.request_read_info().unwrap();
        assert_eq!(device.session.link_mac, 0x0023F7_0000001122);
        assert_eq!(device.session.pump_mac, 0x0023F7_0000003344);
    }

    #[test]
    fn channel_probe_accepts_only_a_matching_echo() {
        // join response: 46-byte internal payload, echoed channel at 0x2B,
        // rssi at 0x1A
        let mut join_payload = vec![0u8; 0x2E];
        join_payload[0x00] = 0x55;
        join_payload[0x1A] = 0xA8; // full-scale rssi
        join_payload[0x2B] = 0x14;
        let mut steps = vec![Step::Timeout];
        steps.extend(reports(&ack_0x81()));
        steps.extend(reports(&incoming_frame(0x80, &join_payload)));
        let mut device = keyed_device(steps);
        let outcome = device.probe_channel().unwrap();
        assert_eq!(
            outcome,
            NegotiationOutcome::Accepted {
                channel: 0x14,
                rssi_percent: 100
            }
        );
    }

    #[test]
    fn short_probe_response_is_a_rejection() {
        let mut short_payload = vec![0u8; 0x0D];
        short_payload[0x00] = 0x55;
        let mut steps = vec![Step::Timeout];
        steps.extend(reports(&ack_0x81()));
        steps.extend(reports(&incoming_frame(0x80, &short_payload)));
        let mut device = keyed_device(steps);
        assert_eq!(device.probe_channel().unwrap(), NegotiationOutcome::Rejected);
    }

    #[test]
    fn negotiation_walks_the_channel_list_and_fails_cleanly() {
        let mut steps = Vec::new();
        // preferred channel plus the five scan channels, all rejected
        for _ in 0..6 {
            let mut short_payload = vec![0u8; 0x0D];
            short_payload[0x00] = 0x55;
            steps.push(Step::Timeout);
            steps.extend(reports(&ack_0x81()));
            steps.extend(reports(&incoming_frame(0x80, &short_payload)));
        }
        let mut device = keyed_device(steps);
        let outcome = device.negotiate_channel(0x1A).unwrap();
        assert_eq!(outcome, NegotiationOutcome::Rejected);
        assert_eq!(device.session.radio_channel, 0);
    }

    #[test]
    fn pump_time_round_trips_through_the_encrypted_layer() {
        let encoded = ((0x2000_0000u64) << 32) | (0x1_0000_0000u64 - 7200) as u64;
        let mut body = vec![0x01]; // time set
        body.extend_from_slice(&encoded.to_be_bytes());

        let mut device = keyed_device(vec![]);
        let frame = comd_0x80(&device.session, ComdCommand::TimeResponse, &body);
        let mut steps = vec![Step::Timeout];
        steps.extend(reports(&ack_0x81()));
        steps.extend(reports(&frame));
        device.transport.steps = VecDeque::from(steps);

        let response = device.get_pump_time().unwrap();
        assert!(response.time_set().unwrap());
        assert_eq!(response.offset().unwrap(), -7200);
        assert_eq!(device.pump_time_offset, -7200);
        assert_eq!(
            time::rtc_from_date(response.datetime().unwrap(), -7200),
            0x2000_0000
        );
    }

    #[test]
    fn unexpected_comd_messages_are_dropped_until_the_answer() {
        let mut device = keyed_device(vec![]);
        let stray = comd_0x80(&device.session, ComdCommand::HighSpeedMode, &[0x00]);
        let mut body = vec![0x00];
        body.extend_from_slice(&0x2000_0000_FFFF_E2D8u64.to_be_bytes());
        let answer = comd_0x80(&device.session, ComdCommand::TimeResponse, &body);

        let mut steps = vec![Step::Timeout];
        steps.extend(reports(&ack_0x81()));
        steps.extend(reports(&stray));
        steps.extend(reports(&answer));
        device.transport.steps = VecDeque::from(steps);

        let response = device.get_pump_time().unwrap();
        assert!(!response.time_set().unwrap());
    }

    #[test]
    fn lost_connection_frame_aborts_the_read() {
        let mut lost = vec![0u8; 0x30 - 0x21];
        lost[0x00] = 0x55;
        lost[0x01] = 0x0D;
        lost[0x05] = 0x02;
        lost[0x08] = 0x02;
        lost[0x0A] = 0x01;
        lost[0x0C] = 0x02;
        let frame = incoming_frame(0x80, &lost);
        assert!(is_lost_connection(&frame));

        let mut steps = vec![Step::Timeout];
        steps.extend(reports(&ack_0x81()));
        steps.extend(reports(&frame));
        steps.push(Step::Timeout); // absorb the post-error clear
        let mut device = keyed_device(steps);
        assert!(matches!(
            device.get_pump_status(),
            Err(CnlError::ConnectionLost(_))
        ));
    }

    #[test]
    fn history_transfer_repairs_a_stall_with_a_targeted_resend() {
        let mut device = keyed_device(vec![]);

        // initiate: 3 packets of 4 bytes
        let mut init_body = Vec::new();
        init_body.extend_from_slice(&12u32.to_be_bytes());
        init_body.extend_from_slice(&4u16.to_be_bytes());
        init_body.extend_from_slice(&4u16.to_be_bytes());
        init_body.extend_from_slice(&3u16.to_be_bytes());
        let init = comd_0x80(
            &device.session,
            ComdCommand::InitiateMultipacketTransfer,
            &init_body,
        );

        let seg = |number: u16, data: [u8; 4]| {
            let mut body = number.to_be_bytes().to_vec();
            body.extend_from_slice(&data);
            comd_0x80(
                &device.session,
                ComdCommand::MultipacketSegmentTransmission,
                &body,
            )
        };
        let end = comd_0x80(&device.session, ComdCommand::EndHistoryTransmission, &[]);

        let mut steps = vec![Step::Timeout]; // pre-send clear of the request
        steps.extend(reports(&ack_0x81()));
        steps.extend(reports(&init));
        steps.push(Step::Timeout); // pre-send clear of the initiate ack
        steps.extend(reports(&ack_0x81()));
        steps.extend(reports(&seg(0, [0xA0, 0xA1, 0xA2, 0xA3])));
        steps.push(Step::Timeout); // the radio goes quiet, transfer stalls
        steps.push(Step::Timeout); // pre-send clear of the resend request
        steps.extend(reports(&ack_0x81()));
        steps.extend(reports(&seg(1, [0xB0, 0xB1, 0xB2, 0xB3])));
        steps.extend(reports(&seg(2, [0xC0, 0xC1, 0xC2, 0xC3])));
        steps.push(Step::Timeout); // pre-send clear of the completion ack
        steps.extend(reports(&ack_0x81()));
        steps.extend(reports(&end));
        device.transport.steps = VecDeque::from(steps);

        let start = time::from_rtc_and_offset(0x2000_0000, 0);
        let end_date = time::from_rtc_and_offset(0x2100_0000, 0);
        let segments = device
            .get_history(start, end_date, HistoryDataType::PumpData)
            .unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(
            segments[0].as_ref(),
            &[0xA0, 0xA1, 0xA2, 0xA3, 0xB0, 0xB1, 0xB2, 0xB3, 0xC0, 0xC1, 0xC2, 0xC3]
        );

        // writes: history request, initiate ack, resend request, completion ack
        assert_eq!(device.transport.writes.len(), 4);
        let resend_frame: Vec<u8> = {
            let report = &device.transport.writes[2];
            report[4..4 + report[3] as usize].to_vec()
        };
        let envelope = CnlEnvelope::decode(&resend_frame).unwrap();
        let encrypted = &envelope.payload[13..envelope.payload.len() - 2];
        let clear = device.session.decrypt(encrypted).unwrap();
        assert_eq!(
            u16::from_be_bytes(clear[1..3].try_into().unwrap()),
            u16::from(ComdCommand::MultipacketResendPackets)
        );
        // the first gap starts at slot 1 and runs 2 segments
        assert_eq!(u16::from_be_bytes(clear[3..5].try_into().unwrap()), 1);
        assert_eq!(u16::from_be_bytes(clear[5..7].try_into().unwrap()), 2);
    }

    #[test]
    fn connect_failure_without_channel_reports_negotiation_failed() {
        // everything up to negotiation succeeds, all probes rejected
        let mut steps: Vec<Step> = Vec::new();
        // device info: X -> astm frame + ENQ
        let mut astm = vec![ascii::STX, b'1'];
        astm.extend_from_slice(
            b"M|1|ID|^^^|BAYER7350^1.0\\A^B\\C^D\\E^6229-1234567^19^7350-2345678|A|\r",
        );
        astm.push(ascii::ETB);
        steps.push(Step::Timeout);
        steps.extend(reports(&astm));
        steps.extend(reports(&[ascii::ENQ]));
        // control mode
        steps.push(Step::Timeout);
        steps.extend(reports(&[ascii::EOT]));
        steps.push(Step::Timeout);
        steps.extend(reports(&[ascii::ACK]));
        // passthrough
        for _ in 0..3 {
            steps.push(Step::Timeout);
            steps.extend(reports(&[ascii::ACK]));
        }
        // open connection echo
        steps.push(Step::Timeout);
        steps.extend(reports(&incoming_frame(0x10, &[])));
        // read info
        let mut info = Vec::new();
        info.extend_from_slice(&0x0023F7_0000001122u64.to_be_bytes());
        info.extend_from_slice(&0x0023F7_0000003344u64.to_be_bytes());
        steps.push(Step::Timeout);
        steps.extend(reports(&incoming_frame(0x14, &info)));
        // link key: 55 packed bytes
        let packed = vec![0x5Au8; 55];
        steps.push(Step::Timeout);
        steps.extend(reports(&incoming_frame(0x86, &packed)));
        // six rejected probes
        for _ in 0..6 {
            let mut short_payload = vec![0u8; 0x0D];
            short_payload[0x00] = 0x55;
            steps.push(Step::Timeout);
            steps.extend(reports(&ack_0x81()));
            steps.extend(reports(&incoming_frame(0x80, &short_payload)));
        }
        // teardown sends run into silence
        for _ in 0..16 {
            steps.push(Step::Timeout);
        }

        let mut device = PumpDevice::new(ScriptedDevice::new(steps));
        let mut store = MemoryPairingStore::default();
        assert!(matches!(
            device.connect(&mut store),
            Err(CnlError::NegotiationFailed)
        ));
        assert_eq!(device.session.stick_serial(), "6229-1234567");
    }
}
