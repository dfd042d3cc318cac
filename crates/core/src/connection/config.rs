//! JSON payloads accepted by connection calls
//!
//! Field names follow the browser `RTCConfiguration` dictionary (camelCase),
//! so the same documents can be shared with web peers.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::{RTCAnswerOptions, RTCOfferOptions};
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::ice_transport_policy::RTCIceTransportPolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

/// STUN or TURN server entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    /// Server URLs (stun:, turn: or turns:)
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub credential: String,
}

/// Connection configuration passed to ConnectionAllocate
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    #[serde(default)]
    pub ice_servers: Vec<IceServerConfig>,

    /// `all` or `relay`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ice_transport_policy: Option<String>,

    /// `balanced`, `max-compat` or `max-bundle`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_policy: Option<String>,

    /// `negotiate` or `require`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtcp_mux_policy: Option<String>,

    #[serde(default)]
    pub ice_candidate_pool_size: u8,
}

impl ConnectionConfig {
    /// Parse a configuration document
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Convert to the engine configuration
    pub fn to_rtc_configuration(&self) -> Result<RTCConfiguration> {
        let ice_servers = self
            .ice_servers
            .iter()
            .map(|server| {
                #[allow(clippy::needless_update)]
                RTCIceServer {
                    urls: server.urls.clone(),
                    username: server.username.clone(),
                    credential: server.credential.clone(),
                    ..Default::default()
                }
            })
            .collect();

        let ice_transport_policy = match self.ice_transport_policy.as_deref() {
            None => RTCIceTransportPolicy::Unspecified,
            Some("all") => RTCIceTransportPolicy::All,
            Some("relay") => RTCIceTransportPolicy::Relay,
            Some(other) => return Err(unknown_policy("iceTransportPolicy", other)),
        };

        let bundle_policy = match self.bundle_policy.as_deref() {
            None => RTCBundlePolicy::Unspecified,
            Some("balanced") => RTCBundlePolicy::Balanced,
            Some("max-compat") => RTCBundlePolicy::MaxCompat,
            Some("max-bundle") => RTCBundlePolicy::MaxBundle,
            Some(other) => return Err(unknown_policy("bundlePolicy", other)),
        };

        let rtcp_mux_policy = match self.rtcp_mux_policy.as_deref() {
            None => RTCRtcpMuxPolicy::Unspecified,
            Some("negotiate") => RTCRtcpMuxPolicy::Negotiate,
            Some("require") => RTCRtcpMuxPolicy::Require,
            Some(other) => return Err(unknown_policy("rtcpMuxPolicy", other)),
        };

        Ok(RTCConfiguration {
            ice_servers,
            ice_transport_policy,
            bundle_policy,
            rtcp_mux_policy,
            ice_candidate_pool_size: self.ice_candidate_pool_size,
            ..Default::default()
        })
    }
}

fn unknown_policy(field: &str, value: &str) -> Error {
    Error::deserialization(format!("unknown {} value: {:?}", field, value))
}

/// Options for CreateOffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferOptions {
    #[serde(default)]
    pub ice_restart: bool,
    #[serde(default)]
    pub voice_activity_detection: bool,
}

impl From<OfferOptions> for RTCOfferOptions {
    fn from(options: OfferOptions) -> Self {
        RTCOfferOptions {
            ice_restart: options.ice_restart,
            voice_activity_detection: options.voice_activity_detection,
        }
    }
}

/// Options for CreateAnswer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerOptions {
    #[serde(default)]
    pub voice_activity_detection: bool,
}

impl From<AnswerOptions> for RTCAnswerOptions {
    fn from(options: AnswerOptions) -> Self {
        RTCAnswerOptions {
            voice_activity_detection: options.voice_activity_detection,
        }
    }
}

/// Parse optional options; absent means defaults
pub(crate) fn parse_options<T>(bytes: Option<&[u8]>) -> Result<Option<T>>
where
    T: for<'de> Deserialize<'de>,
{
    bytes
        .map(|b| serde_json::from_slice(b).map_err(Error::from))
        .transpose()
}

/// Session description as exchanged with the caller: `{"type": .., "sdp": ..}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescriptionJson {
    #[serde(rename = "type")]
    pub sdp_type: String,
    pub sdp: String,
}

impl SessionDescriptionJson {
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Internal(e.to_string()))
    }

    /// Parse the SDP into an engine description
    pub fn into_rtc(self) -> Result<RTCSessionDescription> {
        let parsed = match self.sdp_type.as_str() {
            "offer" => RTCSessionDescription::offer(self.sdp),
            "answer" => RTCSessionDescription::answer(self.sdp),
            "pranswer" => RTCSessionDescription::pranswer(self.sdp),
            other => {
                return Err(Error::deserialization(format!(
                    "unsupported description type: {:?}",
                    other
                )))
            }
        };
        parsed.map_err(|e| Error::deserialization(format!("invalid SDP: {}", e)))
    }
}

impl From<&RTCSessionDescription> for SessionDescriptionJson {
    fn from(desc: &RTCSessionDescription) -> Self {
        Self {
            sdp_type: desc.sdp_type.to_string(),
            sdp: desc.sdp.clone(),
        }
    }
}

/// Options for CreateDataChannel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataChannelOptions {
    #[serde(default = "default_label")]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ordered: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_packet_life_time: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retransmits: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    /// Stream id of an out-of-band negotiated channel
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negotiated: Option<u16>,
}

fn default_label() -> String {
    "data".to_string()
}

impl Default for DataChannelOptions {
    fn default() -> Self {
        Self {
            label: default_label(),
            ordered: None,
            max_packet_life_time: None,
            max_retransmits: None,
            protocol: None,
            negotiated: None,
        }
    }
}

impl DataChannelOptions {
    pub fn to_init(&self) -> RTCDataChannelInit {
        RTCDataChannelInit {
            ordered: self.ordered,
            max_packet_life_time: self.max_packet_life_time,
            max_retransmits: self.max_retransmits,
            protocol: self.protocol.clone(),
            negotiated: self.negotiated,
        }
    }
}
