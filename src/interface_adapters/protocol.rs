// Wire codec: the `{call:int, data:object}` envelope in and out.
//
// Decoding is split in two tiers, matching spec.md §7's error taxonomy:
//   - a malformed envelope (bad JSON, non-integer `call`, `call` outside
//     [0,12]) is a `DecodeError` and becomes `ERR{BAD_PROTO}` upstream;
//   - a recognized command with missing/wrong-shaped fields decodes fine
//     (every field is optional here) and becomes a per-command precondition
//     violation that the dispatcher reports with the command's own ERR code.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::LobbySummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    Malformed,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct IdData {
    pub game: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct HostData {
    pub game: Option<String>,
    pub is_public: Option<bool>,
    pub is_mesh: Option<bool>,
    pub max_peers: Option<f64>,
    pub tags: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct JoinData {
    pub game: Option<String>,
    pub lobby_code: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct QueueData {
    pub game: Option<String>,
    pub max_peers: Option<f64>,
    pub tags: Option<String>,
    pub is_mesh: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ViewData {
    pub game: Option<String>,
    pub lobby_code: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct KickData {
    pub id: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct OfferData {
    pub to_id: Option<f64>,
    #[serde(default)]
    pub offer: Value,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct AnswerData {
    pub to_id: Option<f64>,
    #[serde(default)]
    pub answer: Value,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct CandidateData {
    pub to_id: Option<f64>,
    #[serde(default)]
    pub media: Value,
    pub index: Option<f64>,
    #[serde(default)]
    pub sdp: Value,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ReadyData {
    pub id: Option<f64>,
    #[serde(default)]
    pub status: Value,
    pub peer_count: Option<f64>,
}

#[derive(Debug, Clone)]
pub enum ClientCommand {
    Id(IdData),
    Host(HostData),
    Join(JoinData),
    Queue(QueueData),
    View(ViewData),
    Kick(KickData),
    Offer(OfferData),
    Answer(AnswerData),
    Candidate(CandidateData),
    Ready(ReadyData),
    Start,
    /// `call` decoded in range but names a server-only opcode (ADD=5, ERR=12).
    /// Dispatched the same as an unrecognized command: `ERR{BAD_PROTO}`.
    Unknown,
}

pub fn decode(text: &str) -> Result<ClientCommand, DecodeError> {
    let raw: Value = serde_json::from_str(text).map_err(|_| DecodeError::Malformed)?;
    let obj = raw.as_object().ok_or(DecodeError::Malformed)?;
    let call_val = obj.get("call").ok_or(DecodeError::Malformed)?;
    let call = truncate_to_i64(call_val).ok_or(DecodeError::Malformed)?;
    if !(0..=12).contains(&call) {
        return Err(DecodeError::Malformed);
    }

    let data = obj.get("data").cloned().unwrap_or(Value::Object(Default::default()));
    Ok(match call {
        0 => ClientCommand::Id(parse_data(data)),
        1 => ClientCommand::Host(parse_data(data)),
        2 => ClientCommand::Join(parse_data(data)),
        3 => ClientCommand::Queue(parse_data(data)),
        4 => ClientCommand::View(parse_data(data)),
        6 => ClientCommand::Kick(parse_data(data)),
        7 => ClientCommand::Offer(parse_data(data)),
        8 => ClientCommand::Answer(parse_data(data)),
        9 => ClientCommand::Candidate(parse_data(data)),
        10 => ClientCommand::Ready(parse_data(data)),
        11 => ClientCommand::Start,
        _ => ClientCommand::Unknown,
    })
}

fn parse_data<T: serde::de::DeserializeOwned + Default>(data: Value) -> T {
    serde_json::from_value(data).unwrap_or_default()
}

fn truncate_to_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i)
            } else if let Some(u) = n.as_u64() {
                Some(u as i64)
            } else {
                n.as_f64().map(|f| f.trunc() as i64)
            }
        }
        _ => None,
    }
}

/// Truncates a loosely-typed numeric field toward zero, the way the codec's
/// "numeric fields are coerced by truncation toward zero" rule requires.
pub fn trunc_u32(v: f64) -> Option<u32> {
    if !v.is_finite() {
        return None;
    }
    let truncated = v.trunc();
    if truncated < 0.0 || truncated > u32::MAX as f64 {
        return None;
    }
    Some(truncated as u32)
}

#[derive(Debug, Clone, Serialize)]
struct Envelope<T: Serialize> {
    call: i64,
    data: T,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct Empty {}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostReply {
    pub id: u32,
    pub lobby_code: String,
    pub is_mesh: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinReply {
    pub id: u32,
    pub is_mesh: bool,
    pub lobby_code: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueReply {
    pub id: u32,
    pub lobby_code: String,
    pub is_mesh: bool,
    pub is_host: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ViewReply {
    #[serde(rename = "lobbyList")]
    pub lobby_list: Vec<LobbySummary>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddOut {
    pub peer_id: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KickOut {
    pub id: u32,
    pub lobby_alive: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferOut {
    pub from_id: u32,
    pub offer: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerOut {
    pub from_id: u32,
    pub answer: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateOut {
    pub from_id: u32,
    pub media: Value,
    pub index: Value,
    pub sdp: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyOut {
    pub id: Option<u32>,
    pub status: Value,
    pub peer_count: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrOut {
    pub code: u16,
    pub reason: &'static str,
}

/// A fully-built outbound frame. Each variant knows its own `call` number.
#[derive(Debug, Clone)]
pub enum ServerFrame {
    Id,
    Host(HostReply),
    Join(JoinReply),
    Queue(QueueReply),
    View(ViewReply),
    Add(AddOut),
    Kick(KickOut),
    Offer(OfferOut),
    Answer(AnswerOut),
    Candidate(CandidateOut),
    Ready(ReadyOut),
    /// The queue-full probe: READY with an empty payload, sent straight to the host.
    ReadyProbe,
    /// A non-host's READY payload, forwarded to the host verbatim.
    ReadyRaw(Value),
    Start,
    Err(ErrOut),
}

impl ServerFrame {
    pub fn err(reason: crate::domain::CloseReason) -> Self {
        ServerFrame::Err(ErrOut {
            code: reason.code(),
            reason: reason.text(),
        })
    }

    pub fn to_text(&self) -> String {
        fn wrap<T: Serialize>(call: i64, data: T) -> String {
            serde_json::to_string(&Envelope { call, data })
                .unwrap_or_else(|_| "{\"call\":-1,\"data\":{}}".to_string())
        }

        match self {
            ServerFrame::Id => wrap(0, Empty::default()),
            ServerFrame::Host(p) => wrap(1, p.clone()),
            ServerFrame::Join(p) => wrap(2, p.clone()),
            ServerFrame::Queue(p) => wrap(3, p.clone()),
            ServerFrame::View(p) => wrap(4, p.clone()),
            ServerFrame::Add(p) => wrap(5, p.clone()),
            ServerFrame::Kick(p) => wrap(6, p.clone()),
            ServerFrame::Offer(p) => wrap(7, p.clone()),
            ServerFrame::Answer(p) => wrap(8, p.clone()),
            ServerFrame::Candidate(p) => wrap(9, p.clone()),
            ServerFrame::Ready(p) => wrap(10, p.clone()),
            ServerFrame::ReadyProbe => wrap(10, Empty::default()),
            ServerFrame::ReadyRaw(v) => wrap(10, v.clone()),
            ServerFrame::Start => wrap(11, Empty::default()),
            ServerFrame::Err(p) => wrap(12, p.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_well_formed_host_command() {
        let text = r#"{"call":1,"data":{"game":"chess","isPublic":true,"maxPeers":4}}"#;
        match decode(text).unwrap() {
            ClientCommand::Host(data) => {
                assert_eq!(data.game.as_deref(), Some("chess"));
                assert_eq!(data.is_public, Some(true));
                assert_eq!(data.max_peers, Some(4.0));
            }
            _ => panic!("expected Host"),
        }
    }

    #[test]
    fn truncates_float_call_toward_zero() {
        let text = r#"{"call":1.9,"data":{}}"#;
        assert!(matches!(decode(text).unwrap(), ClientCommand::Host(_)));
    }

    #[test]
    fn rejects_out_of_range_call() {
        let text = r#"{"call":13,"data":{}}"#;
        assert_eq!(decode(text).unwrap_err(), DecodeError::Malformed);
    }

    #[test]
    fn rejects_non_integer_call() {
        let text = r#"{"call":"host","data":{}}"#;
        assert_eq!(decode(text).unwrap_err(), DecodeError::Malformed);
    }

    #[test]
    fn rejects_invalid_json() {
        assert_eq!(decode("not json").unwrap_err(), DecodeError::Malformed);
    }

    #[test]
    fn missing_fields_still_decode_for_dispatcher_to_reject() {
        let text = r#"{"call":1,"data":{}}"#;
        match decode(text).unwrap() {
            ClientCommand::Host(data) => {
                assert!(data.game.is_none());
                assert!(data.max_peers.is_none());
            }
            _ => panic!("expected Host"),
        }
    }

    #[test]
    fn server_only_opcodes_decode_as_unknown() {
        assert!(matches!(
            decode(r#"{"call":5,"data":{}}"#).unwrap(),
            ClientCommand::Unknown
        ));
        assert!(matches!(
            decode(r#"{"call":12,"data":{}}"#).unwrap(),
            ClientCommand::Unknown
        ));
    }

    #[test]
    fn round_trips_err_frame() {
        let frame = ServerFrame::err(crate::domain::CloseReason::BadProto);
        let text = frame.to_text();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["call"], 12);
        assert_eq!(value["data"]["code"], 4005);
        assert_eq!(value["data"]["reason"], "BAD_PROTO");
    }

    #[test]
    fn trunc_u32_rejects_negative_and_nan() {
        assert_eq!(trunc_u32(-1.0), None);
        assert_eq!(trunc_u32(f64::NAN), None);
        assert_eq!(trunc_u32(4.9), Some(4));
    }
}
