//! Variant registry
//!
//! Maps wire tags to catalog variants so a receiver can decode any frame
//! without knowing its type in advance. Built once at startup, read-only after.

mod legacy;

pub use legacy::{is_retired, LEGACY_ALIASES, RETIRED_TAGS};

use std::collections::HashMap;

use thiserror::Error;

use crate::config::CodecConfig;
use crate::protocol::{
    BodyError, BodyFormat, CodecError, Envelope, EnvelopeFrame, Message, MessageKind, Variant,
    VariantShape,
};

/// Registry errors
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Tag {tag} is already registered with a different shape")]
    DuplicateTag { tag: String },

    #[error("Tag {0} is retired and cannot be registered")]
    RetiredTag(String),

    #[error("Unknown tag: {0}")]
    UnknownTag(String),

    #[error("Body of {tag} does not match its registered shape: {reason}")]
    SchemaMismatch { tag: String, reason: String },

    #[error("{0} is not registered in this process")]
    Unregistered(MessageKind),

    #[error("Failed to encode {tag}: {source}")]
    Encode {
        tag: &'static str,
        #[source]
        source: BodyError,
    },

    #[error("Frame error: {0}")]
    Frame(#[from] CodecError),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// One registered tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantDescriptor {
    pub tag: String,
    pub kind: MessageKind,
    pub shape: VariantShape,
    /// Decode-only tag; encoding always uses the canonical tag
    pub alias: bool,
}

impl VariantDescriptor {
    /// Descriptor for the canonical tag of `kind`
    pub fn canonical(kind: MessageKind) -> Self {
        Self {
            tag: kind.canonical_tag().to_string(),
            kind,
            shape: kind.shape(),
            alias: false,
        }
    }

    /// Descriptor for an extra tag that decodes to `kind`
    pub fn alias(tag: impl Into<String>, kind: MessageKind) -> Self {
        Self {
            tag: tag.into(),
            kind,
            shape: kind.shape(),
            alias: true,
        }
    }

    fn same_variant(&self, other: &VariantDescriptor) -> bool {
        self.kind == other.kind && self.shape == other.shape
    }
}

/// Collects variants before the registry is frozen
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    variants: HashMap<String, VariantDescriptor>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tag. Registering the same tag again with an identical
    /// variant is a no-op.
    pub fn register(&mut self, descriptor: VariantDescriptor) -> RegistryResult<()> {
        if is_retired(&descriptor.tag) {
            return Err(RegistryError::RetiredTag(descriptor.tag));
        }

        match self.variants.get(&descriptor.tag) {
            Some(existing) if existing.same_variant(&descriptor) => {
                tracing::trace!("Tag {} registered again", descriptor.tag);
                Ok(())
            }
            Some(_) => Err(RegistryError::DuplicateTag {
                tag: descriptor.tag,
            }),
            None => {
                tracing::trace!("Registered {} as {}", descriptor.tag, descriptor.kind);
                self.variants.insert(descriptor.tag.clone(), descriptor);
                Ok(())
            }
        }
    }

    pub fn register_variant<T: Variant>(&mut self) -> RegistryResult<()> {
        self.register(VariantDescriptor::canonical(T::KIND))
    }

    /// Register every canonical variant
    pub fn with_catalog(mut self) -> RegistryResult<Self> {
        for kind in MessageKind::ALL {
            self.register(VariantDescriptor::canonical(*kind))?;
        }
        Ok(self)
    }

    /// Register the bare tags of the first catalog revision
    pub fn with_legacy_aliases(mut self) -> RegistryResult<Self> {
        for (tag, kind) in LEGACY_ALIASES {
            self.register(VariantDescriptor::alias(*tag, *kind))?;
        }
        Ok(self)
    }

    pub fn build(self) -> Registry {
        tracing::debug!("Variant registry built with {} tags", self.variants.len());
        Registry {
            variants: self.variants,
        }
    }
}

/// Immutable tag to variant mapping
#[derive(Debug, Clone)]
pub struct Registry {
    variants: HashMap<String, VariantDescriptor>,
}

impl Registry {
    /// Registry with the full canonical catalog
    pub fn catalog() -> RegistryResult<Self> {
        Ok(RegistryBuilder::new().with_catalog()?.build())
    }

    /// Registry as described by the codec configuration
    pub fn from_config(config: &CodecConfig) -> RegistryResult<Self> {
        let mut builder = RegistryBuilder::new().with_catalog()?;
        if config.accept_legacy_tags {
            builder = builder.with_legacy_aliases()?;
        }
        Ok(builder.build())
    }

    pub fn lookup(&self, tag: &str) -> Option<&VariantDescriptor> {
        self.variants.get(tag)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.variants.contains_key(tag)
    }

    /// Check whether messages of `kind` can be encoded by this process
    pub fn knows(&self, kind: MessageKind) -> bool {
        self.lookup(kind.canonical_tag())
            .is_some_and(|d| d.kind == kind && !d.alias)
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    /// All descriptors, sorted by tag
    pub fn descriptors(&self) -> Vec<&VariantDescriptor> {
        let mut all: Vec<_> = self.variants.values().collect();
        all.sort_by(|a, b| a.tag.cmp(&b.tag));
        all
    }

    /// Encode a message body under its canonical tag
    pub fn encode(&self, message: &Message, format: BodyFormat) -> RegistryResult<(&'static str, Vec<u8>)> {
        let kind = message.kind();
        if !self.knows(kind) {
            return Err(RegistryError::Unregistered(kind));
        }

        let tag = kind.canonical_tag();
        let body = message
            .encode_body(format)
            .map_err(|source| RegistryError::Encode { tag, source })?;
        Ok((tag, body))
    }

    /// Decode a body registered under `tag`
    pub fn decode(&self, tag: &str, body: &[u8], format: BodyFormat) -> RegistryResult<Message> {
        let descriptor = self
            .lookup(tag)
            .ok_or_else(|| RegistryError::UnknownTag(tag.to_string()))?;

        descriptor
            .kind
            .decode_body(format, body)
            .map_err(|e| RegistryError::SchemaMismatch {
                tag: tag.to_string(),
                reason: e.to_string(),
            })
    }

    /// Encode a whole envelope into its wire frame
    pub fn encode_envelope(&self, envelope: &Envelope, format: BodyFormat) -> RegistryResult<EnvelopeFrame> {
        let (tag, body) = self.encode(&envelope.message, format)?;
        Ok(EnvelopeFrame {
            tag: tag.to_string(),
            correlation_id: envelope.correlation_id,
            reply_to: envelope.reply_to.clone(),
            format,
            body: body.into(),
        })
    }

    /// Decode the body of a wire frame
    pub fn decode_frame(&self, frame: &EnvelopeFrame) -> RegistryResult<Envelope> {
        let message = self.decode(&frame.tag, &frame.body, frame.format)?;
        Ok(Envelope {
            message,
            correlation_id: frame.correlation_id,
            reply_to: frame.reply_to.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::*;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn registry() -> Registry {
        RegistryBuilder::new()
            .with_catalog()
            .unwrap()
            .with_legacy_aliases()
            .unwrap()
            .build()
    }

    fn roundtrip(registry: &Registry, message: Message, format: BodyFormat) {
        let (tag, body) = registry.encode(&message, format).unwrap();
        let decoded = registry.decode(tag, &body, format).unwrap();
        assert_eq!(decoded, message, "{} did not survive {}", tag, format);
    }

    /// One message per catalog kind, in catalog order, optionals present
    fn samples() -> Vec<Message> {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let skywars = GameType::new("Skywars").with_mode("Solo").with_map("Islands");

        let mut version_info = BTreeMap::new();
        version_info.insert("commit".to_string(), "a1b2c3".to_string());
        let mut players = BTreeMap::new();
        players.insert(a, "Notch".to_string());
        players.insert(b, "jeb_".to_string());
        let mut friends = BTreeMap::new();
        friends.insert(a, Some(skywars.clone()));
        friends.insert(b, None);
        let mut additional_debug = BTreeMap::new();
        additional_debug.insert("phase".to_string(), "pregame".to_string());

        vec![
            PingMessage {
                container_id: a,
                version_info,
            }
            .into(),
            GameStateUpdateMessage {
                instance_id: b,
                empty_player_slots: 7,
            }
            .into(),
            SendChatMessage::new(a, "<red>Hello").with_type(ChatType::Subtitle).into(),
            RequestAddToQueueMessage {
                player: a,
                game_type: GameType::new("Bedwars").with_map("Castle"),
            }
            .into(),
            RequestRemoveFromQueueMessage { player: a }.into(),
            RequestCreateInstanceMessage {
                container_id: a,
                game_type: skywars.clone(),
            }
            .into(),
            NotifyInstanceCreatedMessage {
                container_id: a,
                instance_id: b,
                game_type: skywars.clone(),
            }
            .into(),
            NotifyInstanceRemovedMessage {
                container_id: a,
                instance_id: b,
            }
            .into(),
            SendPlayerToInstanceMessage {
                player: a,
                instance: b,
            }
            .into(),
            PlayJukeboxSongMessage { player: a }.into(),
            PauseJukeboxSongMessage { player: a }.into(),
            AddJukeboxSongToQueueMessage {
                player: a,
                song: "Pigstep".into(),
            }
            .into(),
            RemoveJukeboxSongFromQueueMessage {
                player: a,
                index: i32::MAX,
            }
            .into(),
            GetJukeboxQueueMessage { player: a }.into(),
            JukeboxQueueResponseMessage {
                queue: vec!["Pigstep".into(), "Otherside".into()],
            }
            .into(),
            InvitePlayerToPartyMessage {
                party_owner: a,
                player: b,
            }
            .into(),
            AcceptPartyInvitationMessage {
                party_owner: a,
                player: b,
            }
            .into(),
            RemovePlayerFromPartyMessage {
                party_owner: a,
                player: b,
            }
            .into(),
            PartyChatMessage {
                player: b,
                message: "gg".into(),
            }
            .into(),
            PartyTransferMessage {
                old_owner: a,
                new_owner: b,
            }
            .into(),
            PartyWarpMessage {
                party_owner: a,
                container_id: b,
                instance_id: Uuid::new_v4(),
            }
            .into(),
            PartyListMessage { player: a }.into(),
            SendFriendRequestMessage {
                player: a,
                target_player: b,
            }
            .into(),
            AcceptFriendRequestMessage {
                requester: a,
                target_player: b,
            }
            .into(),
            RemoveFriendMessage {
                player: a,
                target_player: b,
            }
            .into(),
            RequestFriendListMessage { player: a }.into(),
            FriendListResponseMessage { friends }.into(),
            RequestUpdateMessage {
                executor: a,
                product: "game-server".into(),
                git_ref: "refs/heads/main".into(),
            }
            .into(),
            ReportErrorMessage {
                container_id: a,
                instance_id: Some(b),
                error_message: "boom".into(),
                stack_trace: "at Game.tick".into(),
                additional_debug,
            }
            .into(),
            ServerSyncMessage {
                container_id: a,
                instances: vec![RunningGameInfo {
                    instance_id: b,
                    game_type: Some(skywars),
                    state: GameStateUpdateMessage {
                        instance_id: b,
                        empty_player_slots: -1,
                    },
                }],
            }
            .into(),
            PlayerSyncMessage {
                container_id: a,
                players,
            }
            .into(),
            QueryPlayerMessage::by_name("Notch").into(),
            QueryPlayerResponse::found("Notch", a).into(),
        ]
    }

    /// Every variant with an optional field, all optionals absent
    fn sparse_samples() -> Vec<Message> {
        let a = Uuid::new_v4();
        let mut friends = BTreeMap::new();
        friends.insert(a, None);

        vec![
            RequestAddToQueueMessage {
                player: a,
                game_type: GameType::new("Bedwars"),
            }
            .into(),
            FriendListResponseMessage { friends }.into(),
            ReportErrorMessage {
                container_id: a,
                instance_id: None,
                error_message: "boom".into(),
                stack_trace: String::new(),
                additional_debug: BTreeMap::new(),
            }
            .into(),
            ServerSyncMessage {
                container_id: a,
                instances: vec![RunningGameInfo {
                    instance_id: a,
                    game_type: None,
                    state: GameStateUpdateMessage {
                        instance_id: a,
                        empty_player_slots: 0,
                    },
                }],
            }
            .into(),
            QueryPlayerMessage {
                player_name: None,
                player_uuid: None,
            }
            .into(),
            QueryPlayerResponse::not_found().into(),
        ]
    }

    #[test]
    fn test_samples_cover_catalog() {
        let kinds: Vec<_> = samples().iter().map(Message::kind).collect();
        assert_eq!(kinds, MessageKind::ALL);
    }

    #[test]
    fn test_roundtrip_both_formats() {
        let registry = registry();
        for message in samples().into_iter().chain(sparse_samples()) {
            roundtrip(&registry, message.clone(), BodyFormat::Json);
            roundtrip(&registry, message, BodyFormat::Bincode);
        }
    }

    #[test]
    fn test_renamed_fields_on_the_wire() {
        let registry = registry();
        let update = RequestUpdateMessage {
            executor: Uuid::nil(),
            product: "proxy".into(),
            git_ref: "v1.2".into(),
        };
        let (_, body) = registry.encode(&update.into(), BodyFormat::Json).unwrap();
        let body = String::from_utf8(body).unwrap();
        assert!(body.contains(r#""ref":"v1.2""#), "{}", body);
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let registry = registry();
        for message in samples() {
            let first = registry.encode(&message, BodyFormat::Json).unwrap();
            let second = registry.encode(&message.clone(), BodyFormat::Json).unwrap();
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut builder = RegistryBuilder::new();
        builder.register_variant::<PingMessage>().unwrap();
        builder.register_variant::<PingMessage>().unwrap();
        assert_eq!(builder.build().len(), 1);
    }

    #[test]
    fn test_duplicate_tag_with_different_shape() {
        let mut builder = RegistryBuilder::new();
        builder
            .register(VariantDescriptor::alias("Shared", MessageKind::PartyChat))
            .unwrap();
        let err = builder
            .register(VariantDescriptor::alias("Shared", MessageKind::Ping))
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateTag { tag } if tag == "Shared"));
    }

    #[test]
    fn test_duplicate_tag_with_same_shape_different_kind() {
        let mut builder = RegistryBuilder::new();
        builder
            .register(VariantDescriptor::alias("Jukebox", MessageKind::PlayJukeboxSong))
            .unwrap();
        assert!(builder
            .register(VariantDescriptor::alias("Jukebox", MessageKind::PauseJukeboxSong))
            .is_err());
    }

    #[test]
    fn test_retired_tag_cannot_be_registered() {
        let mut builder = RegistryBuilder::new();
        let err = builder
            .register(VariantDescriptor::alias(
                "FriendListResponseMessage",
                MessageKind::FriendListResponse,
            ))
            .unwrap_err();
        assert!(matches!(err, RegistryError::RetiredTag(_)));
    }

    #[test]
    fn test_unknown_tag() {
        let registry = registry();
        let err = registry
            .decode("com.bluedragonmc.messages.Nope", b"{}", BodyFormat::Json)
            .unwrap_err();
        assert!(matches!(err, RegistryError::UnknownTag(tag) if tag.ends_with("Nope")));

        let legacy = registry.decode("FriendListResponseMessage", b"{}", BodyFormat::Json);
        assert!(matches!(legacy, Err(RegistryError::UnknownTag(_))));
    }

    #[test]
    fn test_schema_mismatch() {
        let registry = registry();
        let tag = PartyChatMessage::TAG;

        // Missing required field
        let missing = registry.decode(tag, br#"{"player":"5a3d6a4e-1b8a-4a43-9f3a-0f8b7f9d1c2e"}"#, BodyFormat::Json);
        assert!(matches!(missing, Err(RegistryError::SchemaMismatch { .. })));

        // Wrong primitive kind
        let wrong = registry.decode(
            tag,
            br#"{"player":"5a3d6a4e-1b8a-4a43-9f3a-0f8b7f9d1c2e","message":7}"#,
            BodyFormat::Json,
        );
        assert!(matches!(wrong, Err(RegistryError::SchemaMismatch { .. })));
    }

    #[test]
    fn test_absent_optionals_and_defaults() {
        let registry = registry();
        let player = Uuid::new_v4();

        let body = format!(r#"{{"targetPlayer":"{}","message":"hi"}}"#, player);
        let decoded = registry
            .decode(SendChatMessage::TAG, body.as_bytes(), BodyFormat::Json)
            .unwrap();
        assert_eq!(decoded, SendChatMessage::new(player, "hi").into());

        let body = format!(r#"{{"player":"{}","gameType":{{"name":"Skywars"}}}}"#, player);
        let decoded = registry
            .decode(RequestAddToQueueMessage::TAG, body.as_bytes(), BodyFormat::Json)
            .unwrap();
        let Message::RequestAddToQueue(request) = decoded else {
            panic!("wrong variant");
        };
        assert_eq!(request.game_type.mode, None);
        assert_eq!(request.game_type.map_name, None);
    }

    #[test]
    fn test_optional_absent_differs_from_empty() {
        let registry = registry();
        let empty = QueryPlayerMessage::by_name("");
        let absent = QueryPlayerMessage {
            player_name: None,
            player_uuid: None,
        };
        let (_, a) = registry.encode(&empty.clone().into(), BodyFormat::Json).unwrap();
        let (_, b) = registry.encode(&absent.clone().into(), BodyFormat::Json).unwrap();
        assert_ne!(a, b);
        assert_eq!(
            registry.decode(QueryPlayerMessage::TAG, &b, BodyFormat::Json).unwrap(),
            absent.into()
        );
    }

    #[test]
    fn test_json_matches_jvm_field_names() {
        let registry = registry();
        let player = Uuid::nil();
        let message = SendChatMessage::new(player, "hi").with_type(ChatType::ActionBar);
        let (_, body) = registry.encode(&message.into(), BodyFormat::Json).unwrap();
        assert_eq!(
            String::from_utf8(body).unwrap(),
            r#"{"targetPlayer":"00000000-0000-0000-0000-000000000000","message":"hi","chatType":"ACTION_BAR"}"#
        );
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let registry = registry();
        let body = br#"{"player":"5a3d6a4e-1b8a-4a43-9f3a-0f8b7f9d1c2e","addedLater":true}"#;
        assert!(registry
            .decode(PartyListMessage::TAG, body, BodyFormat::Json)
            .is_ok());
    }

    #[test]
    fn test_legacy_alias_decodes_to_canonical() {
        let registry = registry();
        let player = Uuid::new_v4();
        let body = format!(r#"{{"targetPlayer":"{}","message":"hi","type":"TITLE"}}"#, player);
        let decoded = registry
            .decode("SendChatMessage", body.as_bytes(), BodyFormat::Json)
            .unwrap();
        assert_eq!(decoded, SendChatMessage::new(player, "hi").with_type(ChatType::Title).into());

        // Encoding always uses the canonical tag
        let (tag, _) = registry.encode(&decoded, BodyFormat::Json).unwrap();
        assert_eq!(tag, SendChatMessage::TAG);
    }

    #[test]
    fn test_legacy_aliases_are_opt_in() {
        let registry = Registry::from_config(&CodecConfig::default()).unwrap();
        assert!(!registry.contains("PingMessage"));

        let registry = Registry::from_config(&CodecConfig {
            accept_legacy_tags: true,
            ..CodecConfig::default()
        })
        .unwrap();
        assert!(registry.contains("PingMessage"));
        assert_eq!(registry.len(), MessageKind::ALL.len() + LEGACY_ALIASES.len());
    }

    #[test]
    fn test_subset_registry_rejects_unknown_kinds() {
        let mut builder = RegistryBuilder::new();
        builder.register_variant::<PartyChatMessage>().unwrap();
        let registry = builder.build();

        let message: Message = PartyListMessage { player: Uuid::nil() }.into();
        assert!(matches!(
            registry.encode(&message, BodyFormat::Json),
            Err(RegistryError::Unregistered(MessageKind::PartyList))
        ));
    }

    #[test]
    fn test_envelope_roundtrip() {
        let registry = registry();
        let envelope = Envelope::new(GetJukeboxQueueMessage { player: Uuid::new_v4() })
            .with_correlation(CorrelationId::new())
            .with_reply_to("dragonbus.reply.test");

        let frame = registry.encode_envelope(&envelope, BodyFormat::Json).unwrap();
        let bytes = frame.to_bytes().unwrap();
        let decoded = EnvelopeFrame::decode(&bytes, MAX_FRAME_SIZE).unwrap();
        assert_eq!(registry.decode_frame(&decoded).unwrap(), envelope);
    }
}
