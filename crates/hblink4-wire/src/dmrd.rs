use crate::ids::{RadioId, Slot, StreamId, Tg};

/// Length of a well-formed `DMRD` frame, tag included.
pub const DMRD_FRAME_LEN: usize = 55;

/// Whether the call is to a talkgroup (group call) or a single radio (private/unit call).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CallType {
    Group,
    Private,
}

/// The frame-type field carried in bits 4-5 of byte 15.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FrameType {
    Voice,
    VoiceSync,
    DataSync,
    Reserved,
}

impl FrameType {
    fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => FrameType::Voice,
            0b01 => FrameType::VoiceSync,
            0b10 => FrameType::DataSync,
            _ => FrameType::Reserved,
        }
    }

    fn to_bits(self) -> u8 {
        match self {
            FrameType::Voice => 0b00,
            FrameType::VoiceSync => 0b01,
            FrameType::DataSync => 0b10,
            FrameType::Reserved => 0b11,
        }
    }
}

/// The 48-bit DMR air-interface sync pattern that signals end-of-transmission
/// when seen in a data-sync frame's payload (§4.1, §4.3).
pub const SYNC_VOICE_TERMINATOR: [u8; 6] = [0x75, 0x55, 0xFD, 0x7D, 0xF7, 0x5F];

/// A parsed `DMRD` voice/data frame (§4.1).
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct DmrdFrame {
    pub sequence: u8,
    pub rf_src: RadioId,
    pub dst: Tg,
    pub repeater_id: RadioId,
    pub slot: Slot,
    pub call_type: CallType,
    pub frame_type: FrameType,
    pub voice_seq: u8,
    pub stream_id: StreamId,
    /// Bytes 20..53: the 33-byte DMR payload (3x11-byte AMBE + sync/embedded signalling).
    pub payload: [u8; 33],
    /// Bytes 53..55: reserved/BER/RSSI, carried through untouched.
    pub trailer: [u8; 2],
}

impl DmrdFrame {
    /// True when this frame's payload sync pattern signals end-of-transmission (§4.1, §4.3).
    pub fn is_terminator(&self) -> bool {
        self.frame_type == FrameType::DataSync && self.payload[0..6] == SYNC_VOICE_TERMINATOR
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, super::DecodeError> {
        if bytes.len() != DMRD_FRAME_LEN {
            return Err(super::DecodeError::WrongLength {
                tag: "DMRD",
                expected: DMRD_FRAME_LEN,
                got: bytes.len(),
            });
        }

        let flags = bytes[15];
        let slot = Slot::from_bit(flags & 0b1000_0000 != 0);
        let call_type = if flags & 0b0100_0000 != 0 {
            CallType::Private
        } else {
            CallType::Group
        };
        let frame_type = FrameType::from_bits(flags >> 4);
        let voice_seq = flags & 0b0000_1111;

        let mut payload = [0u8; 33];
        payload.copy_from_slice(&bytes[20..53]);

        Ok(DmrdFrame {
            sequence: bytes[4],
            rf_src: RadioId::from_be_bytes([0, bytes[5], bytes[6], bytes[7]]),
            dst: Tg::from_be_bytes3([bytes[8], bytes[9], bytes[10]]),
            repeater_id: RadioId::from_be_bytes([bytes[11], bytes[12], bytes[13], bytes[14]]),
            slot,
            call_type,
            frame_type,
            voice_seq,
            stream_id: StreamId::from_be_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]),
            payload,
            trailer: [bytes[53], bytes[54]],
        })
    }

    pub fn encode(&self) -> [u8; DMRD_FRAME_LEN] {
        let mut out = [0u8; DMRD_FRAME_LEN];
        out[0..4].copy_from_slice(b"DMRD");
        out[4] = self.sequence;
        let src = self.rf_src.to_be_bytes();
        out[5..8].copy_from_slice(&src[1..4]);
        out[8..11].copy_from_slice(&self.dst.to_be_bytes3());
        out[11..15].copy_from_slice(&self.repeater_id.to_be_bytes());

        let mut flags = self.frame_type.to_bits() << 4;
        flags |= self.voice_seq & 0b0000_1111;
        if self.slot.as_bit() {
            flags |= 0b1000_0000;
        }
        if self.call_type == CallType::Private {
            flags |= 0b0100_0000;
        }
        out[15] = flags;

        out[16..20].copy_from_slice(&self.stream_id.to_be_bytes());
        out[20..53].copy_from_slice(&self.payload);
        out[53..55].copy_from_slice(&self.trailer);
        out
    }

    /// Returns a copy of this frame addressed to a different repeater, with
    /// everything else (including stream id and payload) byte-identical.
    ///
    /// Used by the routing engine's fan-out: the wire bytes forwarded to each
    /// target carry that peer's own `repeater_id`, per the HomeBrew framing,
    /// while the voice payload itself passes through unmodified.
    pub fn retargeted(&self, repeater_id: RadioId) -> Self {
        Self { repeater_id, ..self.clone() }
    }
}
