//! Control-plane wire messages (protobuf) and their mapping to crate types.

use crate::types;

// ---------------------------------------------------------------------------
// RPC paths
// ---------------------------------------------------------------------------

pub mod path {
    pub const LOGIN: &str = "/toit.api.Auth/Login";
    pub const STREAM: &str = "/toit.api.pubsub.Subscribe/Stream";
    pub const ACKNOWLEDGE: &str = "/toit.api.pubsub.Subscribe/Acknowledge";
    pub const PUBLISH: &str = "/toit.api.pubsub.Publish/Publish";
}

// ---------------------------------------------------------------------------
// toit.api.Auth
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, prost::Message)]
pub struct LoginRequest {
    #[prost(string, tag = "1")]
    pub username: String,
    #[prost(string, tag = "2")]
    pub password: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct AuthResponse {
    /// UTF-8 token bytes.
    #[prost(bytes = "vec", tag = "1")]
    pub access_token: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub refresh_token: Vec<u8>,
    #[prost(string, tag = "3")]
    pub token_type: String,
}

// ---------------------------------------------------------------------------
// toit.api.pubsub.Subscribe
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, prost::Message)]
pub struct Subscription {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub topic: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct StreamRequest {
    #[prost(message, optional, tag = "1")]
    pub subscription: Option<Subscription>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct StreamResponse {
    #[prost(message, repeated, tag = "1")]
    pub messages: Vec<Envelope>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Envelope {
    #[prost(bytes = "vec", tag = "1")]
    pub id: Vec<u8>,
    #[prost(message, optional, tag = "2")]
    pub message: Option<Message>,
}

/// Only the payload is decoded. Field 1 carries publisher metadata (an
/// embedded message) and is skipped along with any other unknown field.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Message {
    #[prost(bytes = "vec", tag = "2")]
    pub data: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct AcknowledgeRequest {
    #[prost(message, optional, tag = "1")]
    pub subscription: Option<Subscription>,
    #[prost(bytes = "vec", repeated, tag = "2")]
    pub envelope_ids: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct AcknowledgeResponse {}

// ---------------------------------------------------------------------------
// toit.api.pubsub.Publish
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, prost::Message)]
pub struct PublishRequest {
    #[prost(string, tag = "1")]
    pub topic: String,
    #[prost(string, tag = "2")]
    pub publisher_name: String,
    #[prost(bytes = "vec", repeated, tag = "3")]
    pub data: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PublishResponse {}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

impl From<&types::Subscription> for Subscription {
    fn from(s: &types::Subscription) -> Self {
        Self {
            name: s.name.clone(),
            topic: s.topic.clone(),
        }
    }
}

impl From<&types::OutboundMessage> for PublishRequest {
    fn from(m: &types::OutboundMessage) -> Self {
        Self {
            topic: m.topic.clone(),
            publisher_name: m.publisher.clone(),
            data: vec![m.payload.clone()],
        }
    }
}

impl Envelope {
    /// Convert to the crate type. Delivered messages carry no topic on the
    /// wire; they are attributed to the subscription's topic.
    pub fn into_envelope(self, subscription_topic: &str) -> types::Envelope {
        types::Envelope {
            id: types::EnvelopeId::from(self.id),
            topic: subscription_topic.to_string(),
            payload: self.message.map(|m| m.data).unwrap_or_default(),
        }
    }
}

impl AuthResponse {
    pub fn token(&self) -> Result<types::AccessToken, types::Error> {
        let token = std::str::from_utf8(&self.access_token)
            .map_err(|e| types::Error::Auth(format!("access token is not UTF-8: {e}")))?;
        if token.is_empty() {
            return Err(types::Error::Auth("empty access token".to_string()));
        }
        Ok(types::AccessToken::new(token))
    }
}

#[cfg(test)]
mod tests {
    use prost::Message as _;

    use super::*;

    #[test]
    fn stream_response_decodes_into_envelopes() {
        let resp = StreamResponse {
            messages: vec![
                Envelope {
                    id: b"e1".to_vec(),
                    message: Some(Message {
                        data: b"open".to_vec(),
                    }),
                },
                Envelope {
                    id: b"e2".to_vec(),
                    message: None,
                },
            ],
        };
        let decoded = StreamResponse::decode(resp.encode_to_vec().as_slice()).unwrap();
        let envs: Vec<_> = decoded
            .messages
            .into_iter()
            .map(|e| e.into_envelope("cloud:door/out"))
            .collect();

        assert_eq!(envs[0].id, types::EnvelopeId::from("e1"));
        assert_eq!(envs[0].topic, "cloud:door/out");
        assert_eq!(envs[0].payload, b"open");
        assert_eq!(envs[1].topic, "cloud:door/out");
        assert!(envs[1].payload.is_empty());
    }

    /// Server-side message shape with publisher metadata ahead of the payload.
    #[derive(Clone, PartialEq, prost::Message)]
    struct Publisher {
        #[prost(string, tag = "1")]
        name: String,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    struct FullMessage {
        #[prost(message, optional, tag = "1")]
        publisher: Option<Publisher>,
        #[prost(bytes = "vec", tag = "2")]
        data: Vec<u8>,
        #[prost(uint64, tag = "3")]
        created_at: u64,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    struct FullEnvelope {
        #[prost(bytes = "vec", tag = "1")]
        id: Vec<u8>,
        #[prost(message, optional, tag = "2")]
        message: Option<FullMessage>,
    }

    #[test]
    fn publisher_metadata_does_not_disturb_payload() {
        let wire = FullEnvelope {
            id: b"e9".to_vec(),
            message: Some(FullMessage {
                publisher: Some(Publisher {
                    name: "device-\u{00e9}".into(),
                }),
                data: b"hello".to_vec(),
                created_at: 1_700_000_000,
            }),
        }
        .encode_to_vec();

        let env = Envelope::decode(wire.as_slice())
            .unwrap()
            .into_envelope("cloud:door/out");
        assert_eq!(env.id, types::EnvelopeId::from("e9"));
        assert_eq!(env.payload, b"hello");
    }

    #[test]
    fn publish_request_carries_single_payload() {
        let req = PublishRequest::from(&types::OutboundMessage {
            topic: "cloud:door/in".into(),
            publisher: "host-1".into(),
            payload: b"hi".to_vec(),
        });
        assert_eq!(req.topic, "cloud:door/in");
        assert_eq!(req.publisher_name, "host-1");
        assert_eq!(req.data, vec![b"hi".to_vec()]);
    }

    #[test]
    fn auth_response_token_must_be_utf8_and_non_empty() {
        let ok = AuthResponse {
            access_token: b"abc".to_vec(),
            ..Default::default()
        };
        assert_eq!(ok.token().unwrap().as_str(), "abc");

        let empty = AuthResponse::default();
        assert!(empty.token().unwrap_err().is_auth());

        let bad = AuthResponse {
            access_token: vec![0xff, 0xfe],
            ..Default::default()
        };
        assert!(bad.token().is_err());
    }
}
