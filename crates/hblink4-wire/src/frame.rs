use crate::ids::RadioId;
use thiserror::Error;

/// Errors produced while parsing a datagram into a [`Frame`].
///
/// Every variant is non-fatal to the server: the caller logs one line and
/// drops the datagram (§4.8, §7 "Protocol errors").
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("datagram too short to contain a tag")]
    TooShortForTag,
    #[error("unrecognized tag")]
    UnknownTag,
    #[error("{tag} frame has wrong length: expected {expected}, got {got}")]
    WrongLength { tag: &'static str, expected: usize, got: usize },
    #[error("{tag} frame payload is truncated")]
    TruncatedPayload { tag: &'static str },
    #[error("non-ASCII bytes in a text field of {tag}")]
    NotAscii { tag: &'static str },
}

/// 302-byte `RPTC` repeater configuration payload (tag + radio id + fixed
/// ASCII fields), following the field layout long used by HomeBrew-compatible
/// master servers.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct RepeaterConfigInfo {
    pub callsign: String,
    pub rx_freq_hz: String,
    pub tx_freq_hz: String,
    pub tx_power: String,
    pub color_code: String,
    pub latitude: String,
    pub longitude: String,
    pub height_m: String,
    pub location: String,
    pub description: String,
    pub slots: String,
    pub url: String,
    pub software_id: String,
    pub package_id: String,
}

const RPTC_BODY_LEN: usize = 8 + 9 + 9 + 2 + 2 + 8 + 9 + 3 + 20 + 19 + 1 + 124 + 40 + 40;

impl RepeaterConfigInfo {
    fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        if body.len() != RPTC_BODY_LEN {
            return Err(DecodeError::WrongLength {
                tag: "RPTC",
                expected: RPTC_BODY_LEN,
                got: body.len(),
            });
        }
        let mut off = 0usize;
        let mut field = |len: usize| -> Result<String, DecodeError> {
            let slice = &body[off..off + len];
            off += len;
            std::str::from_utf8(slice)
                .map(|s| s.trim().to_string())
                .map_err(|_| DecodeError::NotAscii { tag: "RPTC" })
        };

        Ok(RepeaterConfigInfo {
            callsign: field(8)?,
            rx_freq_hz: field(9)?,
            tx_freq_hz: field(9)?,
            tx_power: field(2)?,
            color_code: field(2)?,
            latitude: field(8)?,
            longitude: field(9)?,
            height_m: field(3)?,
            location: field(20)?,
            description: field(19)?,
            slots: field(1)?,
            url: field(124)?,
            software_id: field(40)?,
            package_id: field(40)?,
        })
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(RPTC_BODY_LEN);
        let mut push = |s: &str, len: usize| {
            let bytes = s.as_bytes();
            let n = bytes.len().min(len);
            out.extend_from_slice(&bytes[..n]);
            out.resize(out.len() + (len - n), b' ');
        };
        push(&self.callsign, 8);
        push(&self.rx_freq_hz, 9);
        push(&self.tx_freq_hz, 9);
        push(&self.tx_power, 2);
        push(&self.color_code, 2);
        push(&self.latitude, 8);
        push(&self.longitude, 9);
        push(&self.height_m, 3);
        push(&self.location, 20);
        push(&self.description, 19);
        push(&self.slots, 1);
        push(&self.url, 124);
        push(&self.software_id, 40);
        push(&self.package_id, 40);
        out
    }
}

/// A parsed HomeBrew-protocol frame (§4.1). Same representation is used for
/// both decode (datagram we received) and encode (datagram we send): the
/// caller knows, from its own role, which direction a given variant flows.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Frame {
    Dmrd(crate::dmrd::DmrdFrame),
    /// `RPTL`: repeater login.
    Login { repeater_id: RadioId },
    /// `RPTK`: SHA-256(salt || passphrase), ASCII-hex encoded.
    AuthResponse { repeater_id: RadioId, hash_hex: [u8; 64] },
    /// `RPTC`: repeater configuration.
    Config { repeater_id: RadioId, info: RepeaterConfigInfo },
    /// `RPTO`: free-form options string (`TS1=1,2,3;TS2=10,20`).
    Options { repeater_id: RadioId, options: String },
    /// `RPTPING`: repeater-role keepalive.
    Ping { repeater_id: RadioId },
    /// `RPTCL`: repeater-initiated graceful disconnect.
    Disconnect { repeater_id: RadioId },
    /// `RPTSBKN`: status beacon, recognized but not acted upon.
    StatusBeacon { repeater_id: RadioId, raw: Vec<u8> },
    /// `RPTACK` carrying the login challenge salt.
    LoginAck { repeater_id: RadioId, salt: [u8; 4] },
    /// Bare `RPTACK`, acknowledging auth, config, or options.
    Ack { repeater_id: RadioId },
    /// `MSTNAK`: rejection (auth failure, collision, blacklist).
    Nak { repeater_id: RadioId },
    /// `MSTPONG`: keepalive reply to `RPTPING`.
    Pong { repeater_id: RadioId },
    /// `MSTCL`: master-initiated graceful disconnect.
    MasterClose { repeater_id: RadioId },
}

fn radio_id_at(bytes: &[u8], offset: usize, tag: &'static str) -> Result<RadioId, DecodeError> {
    bytes
        .get(offset..offset + 4)
        .map(|s| RadioId::from_be_bytes([s[0], s[1], s[2], s[3]]))
        .ok_or(DecodeError::TruncatedPayload { tag })
}

impl Frame {
    pub fn decode(bytes: &[u8]) -> Result<Frame, DecodeError> {
        if bytes.len() < 4 {
            return Err(DecodeError::TooShortForTag);
        }

        // Longest-prefix-first so e.g. "RPTCL" isn't mistaken for "RPTC".
        const TAGS_7: &[(&[u8], &str)] = &[
            (b"RPTSBKN", "RPTSBKN"),
            (b"MSTPING", "MSTPING"),
            (b"MSTPONG", "MSTPONG"),
            (b"RPTPING", "RPTPING"),
        ];
        const TAGS_6: &[(&[u8], &str)] = &[(b"MSTNAK", "MSTNAK"), (b"RPTACK", "RPTACK")];
        const TAGS_5: &[(&[u8], &str)] = &[(b"RPTCL", "RPTCL"), (b"MSTCL", "MSTCL")];
        const TAGS_4: &[(&[u8], &str)] =
            &[(b"DMRD", "DMRD"), (b"RPTL", "RPTL"), (b"RPTK", "RPTK"), (b"RPTC", "RPTC"), (b"RPTO", "RPTO")];

        let matched = TAGS_7
            .iter()
            .find(|(t, _)| bytes.len() >= 7 && &bytes[..7] == *t)
            .or_else(|| TAGS_6.iter().find(|(t, _)| bytes.len() >= 6 && &bytes[..6] == *t))
            .or_else(|| TAGS_5.iter().find(|(t, _)| bytes.len() >= 5 && &bytes[..5] == *t))
            .or_else(|| TAGS_4.iter().find(|(t, _)| &bytes[..4] == *t));

        let Some(&(tag_bytes, tag_name)) = matched else {
            return Err(DecodeError::UnknownTag);
        };
        let tag_len = tag_bytes.len();
        let body = &bytes[tag_len..];

        match tag_name {
            "DMRD" => Ok(Frame::Dmrd(crate::dmrd::DmrdFrame::decode(bytes)?)),
            "RPTL" => Ok(Frame::Login { repeater_id: radio_id_at(body, 0, tag_name)? }),
            "RPTK" => {
                if body.len() != 4 + 64 {
                    return Err(DecodeError::WrongLength { tag: tag_name, expected: 68, got: body.len() });
                }
                let repeater_id = radio_id_at(body, 0, tag_name)?;
                let mut hash_hex = [0u8; 64];
                hash_hex.copy_from_slice(&body[4..68]);
                if !hash_hex.iter().all(u8::is_ascii_hexdigit) {
                    return Err(DecodeError::NotAscii { tag: tag_name });
                }
                Ok(Frame::AuthResponse { repeater_id, hash_hex })
            }
            "RPTC" => {
                let repeater_id = radio_id_at(body, 0, tag_name)?;
                let info = RepeaterConfigInfo::decode(&body[4..])?;
                Ok(Frame::Config { repeater_id, info })
            }
            "RPTO" => {
                let repeater_id = radio_id_at(body, 0, tag_name)?;
                let options = std::str::from_utf8(&body[4..])
                    .map_err(|_| DecodeError::NotAscii { tag: tag_name })?
                    .trim_end_matches('\0')
                    .to_string();
                Ok(Frame::Options { repeater_id, options })
            }
            "RPTPING" => Ok(Frame::Ping { repeater_id: radio_id_at(body, 0, tag_name)? }),
            "RPTCL" => Ok(Frame::Disconnect { repeater_id: radio_id_at(body, 0, tag_name)? }),
            "RPTSBKN" => {
                let repeater_id = radio_id_at(body, 0, tag_name)?;
                Ok(Frame::StatusBeacon { repeater_id, raw: body[4..].to_vec() })
            }
            "RPTACK" => {
                let repeater_id = radio_id_at(body, 0, tag_name)?;
                if body.len() == 4 {
                    Ok(Frame::Ack { repeater_id })
                } else if body.len() == 8 {
                    let mut salt = [0u8; 4];
                    salt.copy_from_slice(&body[4..8]);
                    Ok(Frame::LoginAck { repeater_id, salt })
                } else {
                    Err(DecodeError::WrongLength { tag: tag_name, expected: 8, got: body.len() })
                }
            }
            "MSTNAK" => Ok(Frame::Nak { repeater_id: radio_id_at(body, 0, tag_name)? }),
            "MSTPONG" | "MSTPING" => Ok(Frame::Pong { repeater_id: radio_id_at(body, 0, tag_name)? }),
            "MSTCL" => Ok(Frame::MasterClose { repeater_id: radio_id_at(body, 0, tag_name)? }),
            _ => Err(DecodeError::UnknownTag),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Frame::Dmrd(f) => f.encode().to_vec(),
            Frame::Login { repeater_id } => tagged(b"RPTL", repeater_id, &[]),
            Frame::AuthResponse { repeater_id, hash_hex } => tagged(b"RPTK", repeater_id, hash_hex),
            Frame::Config { repeater_id, info } => tagged(b"RPTC", repeater_id, &info.encode()),
            Frame::Options { repeater_id, options } => tagged(b"RPTO", repeater_id, options.as_bytes()),
            Frame::Ping { repeater_id } => tagged(b"RPTPING", repeater_id, &[]),
            Frame::Disconnect { repeater_id } => tagged(b"RPTCL", repeater_id, &[]),
            Frame::StatusBeacon { repeater_id, raw } => tagged(b"RPTSBKN", repeater_id, raw),
            Frame::LoginAck { repeater_id, salt } => tagged(b"RPTACK", repeater_id, salt),
            Frame::Ack { repeater_id } => tagged(b"RPTACK", repeater_id, &[]),
            Frame::Nak { repeater_id } => tagged(b"MSTNAK", repeater_id, &[]),
            Frame::Pong { repeater_id } => tagged(b"MSTPONG", repeater_id, &[]),
            Frame::MasterClose { repeater_id } => tagged(b"MSTCL", repeater_id, &[]),
        }
    }
}

fn tagged(tag: &[u8], repeater_id: &RadioId, rest: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(tag.len() + 4 + rest.len());
    out.extend_from_slice(tag);
    out.extend_from_slice(&repeater_id.to_be_bytes());
    out.extend_from_slice(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rid() -> RadioId {
        RadioId::from_be_bytes([0x00, 0x04, 0xC0, 0xAB])
    }

    #[test]
    fn login_round_trips() {
        let f = Frame::Login { repeater_id: rid() };
        assert_eq!(Frame::decode(&f.encode()).unwrap(), f);
    }

    #[test]
    fn login_ack_with_salt_round_trips() {
        let f = Frame::LoginAck { repeater_id: rid(), salt: [1, 2, 3, 4] };
        assert_eq!(Frame::decode(&f.encode()).unwrap(), f);
    }

    #[test]
    fn bare_ack_round_trips() {
        let f = Frame::Ack { repeater_id: rid() };
        assert_eq!(Frame::decode(&f.encode()).unwrap(), f);
    }

    #[test]
    fn disconnect_is_not_mistaken_for_config() {
        let f = Frame::Disconnect { repeater_id: rid() };
        let bytes = f.encode();
        assert_eq!(&bytes[..5], b"RPTCL");
        assert_eq!(Frame::decode(&bytes).unwrap(), f);
    }

    #[test]
    fn auth_response_round_trips() {
        let hash_hex = [b'a'; 64];
        let f = Frame::AuthResponse { repeater_id: rid(), hash_hex };
        assert_eq!(Frame::decode(&f.encode()).unwrap(), f);
    }

    #[test]
    fn auth_response_rejects_non_hex() {
        let mut bytes = tagged(b"RPTK", &rid(), &[b'z'; 64]);
        bytes[3] = b'K';
        assert!(matches!(Frame::decode(&bytes), Err(DecodeError::NotAscii { .. })));
    }

    #[test]
    fn config_round_trips() {
        let info = RepeaterConfigInfo {
            callsign: "W1ABC".into(),
            rx_freq_hz: "447000000".into(),
            tx_freq_hz: "442000000".into(),
            tx_power: "25".into(),
            color_code: "1".into(),
            latitude: "40.0000".into(),
            longitude: "-74.00000".into(),
            height_m: "30".into(),
            location: "Somewhere, NJ".into(),
            description: "Test repeater".into(),
            slots: "3".into(),
            url: "https://example.com".into(),
            software_id: "hblink4".into(),
            package_id: "0.1.0".into(),
        };
        let f = Frame::Config { repeater_id: rid(), info };
        assert_eq!(Frame::decode(&f.encode()).unwrap(), f);
    }

    #[test]
    fn options_round_trips() {
        let f = Frame::Options { repeater_id: rid(), options: "TS1=1,2,3;TS2=10,20".into() };
        assert_eq!(Frame::decode(&f.encode()).unwrap(), f);
    }

    #[test]
    fn unknown_tag_rejected() {
        assert_eq!(Frame::decode(b"ZZZZ1234"), Err(DecodeError::UnknownTag));
    }

    #[test]
    fn too_short_rejected() {
        assert_eq!(Frame::decode(b"ZZ"), Err(DecodeError::TooShortForTag));
    }

    #[test]
    fn ping_and_pong_round_trip() {
        let ping = Frame::Ping { repeater_id: rid() };
        assert_eq!(Frame::decode(&ping.encode()).unwrap(), ping);

        let pong = Frame::Pong { repeater_id: rid() };
        assert_eq!(Frame::decode(&pong.encode()).unwrap(), pong);
    }
}
