//! Protocol message definitions
//!
//! Defines every message exchanged between game server nodes and the
//! coordination services. Each variant is a plain record; its wire tag is the
//! fully qualified name the JVM services have always used.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::codec::{BodyError, BodyFormat};
use super::shape::{FieldSpec, FieldType, VariantShape, WireType};

/// Namespace prefix of every canonical tag
pub const TAG_NAMESPACE: &str = "com.bluedragonmc.messages.";

/// Declares a record type together with its wire shape.
///
/// Each field lists its wire name; a trailing `[default]` marks a field that
/// falls back to `Default::default()` when omitted by the sender.
macro_rules! record {
    (
        $(#[$meta:meta])*
        pub struct $name:ident {
            $(
                $(#[$fmeta:meta])*
                pub $field:ident : $ty:ty => $wire:tt $([$dflt:ident])?
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
        pub struct $name {
            $(
                $(#[$fmeta])*
                #[serde(rename = $wire)]
                $(#[serde($dflt)])?
                pub $field: $ty,
            )*
        }

        impl $name {
            /// Ordered wire fields of this record
            pub fn shape() -> VariantShape {
                VariantShape::new(vec![
                    $({
                        let spec = FieldSpec::new($wire, <$ty as WireType>::wire_type());
                        $(let spec = { let _ = stringify!($dflt); spec.defaulted() };)?
                        spec
                    }),*
                ])
            }
        }

        impl WireType for $name {
            fn wire_type() -> FieldType {
                FieldType::Record {
                    name: stringify!($name),
                    fields: $name::shape().fields,
                }
            }
        }
    };
}

// Helper records

record! {
    /// Name, game mode and map of a game.
    pub struct GameType {
        pub name: String => "name",
        pub mode: Option<String> => "mode",
        pub map_name: Option<String> => "mapName",
    }
}

impl GameType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mode: None,
            map_name: None,
        }
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }

    pub fn with_map(mut self, map_name: impl Into<String>) -> Self {
        self.map_name = Some(map_name.into());
        self
    }
}

impl fmt::Display for GameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(mode) = &self.mode {
            write!(f, "/{}", mode)?;
        }
        if let Some(map) = &self.map_name {
            write!(f, " on {}", map)?;
        }
        Ok(())
    }
}

record! {
    /// An instance running on a game server, reported during server sync.
    pub struct RunningGameInfo {
        pub instance_id: Uuid => "instanceId",
        /// The game on this instance, if one is running
        pub game_type: Option<GameType> => "type",
        pub state: GameStateUpdateMessage => "state",
    }
}

/// How a `SendChatMessage` is shown to the player
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChatType {
    #[default]
    Chat,
    ActionBar,
    Title,
    Subtitle,
    Sound,
}

impl WireType for ChatType {
    fn wire_type() -> FieldType {
        FieldType::Enum {
            name: "ChatType",
            members: &["CHAT", "ACTION_BAR", "TITLE", "SUBTITLE", "SOUND"],
        }
    }
}

// Lifecycle and topology

record! {
    /// Sent by a game server when it starts up.
    pub struct PingMessage {
        /// Identifies the server and its container
        pub container_id: Uuid => "containerId",
        /// Currently unused
        pub version_info: BTreeMap<String, String> => "versionInfo",
    }
}

record! {
    /// Sent when the joinable state of a game changes.
    pub struct GameStateUpdateMessage {
        pub instance_id: Uuid => "instanceId",
        /// How many more players may join
        pub empty_player_slots: i32 => "emptyPlayerSlots",
    }
}

record! {
    /// Periodic list of the instances running on a server.
    pub struct ServerSyncMessage {
        pub container_id: Uuid => "containerId",
        pub instances: Vec<RunningGameInfo> => "instances",
    }
}

record! {
    /// Periodic list of the players online on a server, also sent on join/leave.
    pub struct PlayerSyncMessage {
        pub container_id: Uuid => "containerId",
        /// Player id to username
        pub players: BTreeMap<Uuid, String> => "players",
    }
}

// Player routing

record! {
    /// Deliver a chat line, action bar, title, subtitle or sound to a player.
    pub struct SendChatMessage {
        pub target_player: Uuid => "targetPlayer",
        /// MiniMessage-formatted text
        pub message: String => "message",
        #[serde(alias = "type")]
        pub chat_type: ChatType => "chatType" [default],
    }
}

impl SendChatMessage {
    pub fn new(target_player: Uuid, message: impl Into<String>) -> Self {
        Self {
            target_player,
            message: message.into(),
            chat_type: ChatType::Chat,
        }
    }

    pub fn with_type(mut self, chat_type: ChatType) -> Self {
        self.chat_type = chat_type;
        self
    }
}

record! {
    /// Move a player to a specific instance.
    pub struct SendPlayerToInstanceMessage {
        pub player: Uuid => "player",
        pub instance: Uuid => "instance",
    }
}

// Matchmaking

record! {
    pub struct RequestAddToQueueMessage {
        pub player: Uuid => "player",
        pub game_type: GameType => "gameType",
    }
}

record! {
    pub struct RequestRemoveFromQueueMessage {
        pub player: Uuid => "player",
    }
}

// Instance orchestration

record! {
    /// Ask a game server to create a new instance. Answered by
    /// `NotifyInstanceCreatedMessage` once all modules are initialized.
    pub struct RequestCreateInstanceMessage {
        pub container_id: Uuid => "containerId",
        pub game_type: GameType => "gameType",
    }
}

record! {
    pub struct NotifyInstanceCreatedMessage {
        pub container_id: Uuid => "containerId",
        pub instance_id: Uuid => "instanceId",
        pub game_type: GameType => "gameType",
    }
}

record! {
    /// An instance was removed, usually because its game ended.
    pub struct NotifyInstanceRemovedMessage {
        pub container_id: Uuid => "containerId",
        pub instance_id: Uuid => "instanceId",
    }
}

// Jukebox

record! {
    pub struct PlayJukeboxSongMessage {
        pub player: Uuid => "player",
    }
}

record! {
    pub struct PauseJukeboxSongMessage {
        pub player: Uuid => "player",
    }
}

record! {
    pub struct AddJukeboxSongToQueueMessage {
        pub player: Uuid => "player",
        pub song: String => "song",
    }
}

record! {
    pub struct RemoveJukeboxSongFromQueueMessage {
        pub player: Uuid => "player",
        pub index: i32 => "index",
    }
}

record! {
    /// Request for the songs in a player's queue.
    pub struct GetJukeboxQueueMessage {
        pub player: Uuid => "player",
    }
}

record! {
    pub struct JukeboxQueueResponseMessage {
        /// Song names in play order
        pub queue: Vec<String> => "queue",
    }
}

// Parties

record! {
    pub struct InvitePlayerToPartyMessage {
        pub party_owner: Uuid => "partyOwner",
        pub player: Uuid => "player",
    }
}

record! {
    pub struct AcceptPartyInvitationMessage {
        pub party_owner: Uuid => "partyOwner",
        pub player: Uuid => "player",
    }
}

record! {
    /// Remove a player who left or disconnected.
    pub struct RemovePlayerFromPartyMessage {
        pub party_owner: Uuid => "partyOwner",
        pub player: Uuid => "player",
    }
}

record! {
    pub struct PartyChatMessage {
        pub player: Uuid => "player",
        pub message: String => "message",
    }
}

record! {
    pub struct PartyTransferMessage {
        pub old_owner: Uuid => "oldOwner",
        pub new_owner: Uuid => "newOwner",
    }
}

record! {
    /// Send every party member to one instance.
    pub struct PartyWarpMessage {
        pub party_owner: Uuid => "partyOwner",
        pub container_id: Uuid => "containerId",
        pub instance_id: Uuid => "instanceId",
    }
}

record! {
    pub struct PartyListMessage {
        pub player: Uuid => "player",
    }
}

// Friends

record! {
    pub struct SendFriendRequestMessage {
        pub player: Uuid => "player",
        pub target_player: Uuid => "targetPlayer",
    }
}

record! {
    pub struct AcceptFriendRequestMessage {
        pub requester: Uuid => "requester",
        pub target_player: Uuid => "targetPlayer",
    }
}

record! {
    pub struct RemoveFriendMessage {
        pub player: Uuid => "player",
        pub target_player: Uuid => "targetPlayer",
    }
}

record! {
    pub struct RequestFriendListMessage {
        pub player: Uuid => "player",
    }
}

record! {
    pub struct FriendListResponseMessage {
        /// Friend id to the game they are playing, `None` when offline
        pub friends: BTreeMap<Uuid, Option<GameType>> => "friends",
    }
}

// Service and debugging

record! {
    /// Ask the service to update a product from a git ref.
    pub struct RequestUpdateMessage {
        /// Player that receives progress output
        pub executor: Uuid => "executor",
        pub product: String => "product",
        pub git_ref: String => "ref",
    }
}

record! {
    pub struct ReportErrorMessage {
        pub container_id: Uuid => "containerId",
        pub instance_id: Option<Uuid> => "instanceId",
        pub error_message: String => "errorMessage",
        pub stack_trace: String => "stackTrace",
        /// Extra context, may be empty
        pub additional_debug: BTreeMap<String, String> => "additionalDebug",
    }
}

record! {
    /// Look up a player by name or id. At least one of the two must be set.
    pub struct QueryPlayerMessage {
        pub player_name: Option<String> => "playerName",
        pub player_uuid: Option<Uuid> => "playerUUID",
    }
}

impl QueryPlayerMessage {
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            player_name: Some(name.into()),
            player_uuid: None,
        }
    }

    pub fn by_uuid(uuid: Uuid) -> Self {
        Self {
            player_name: None,
            player_uuid: Some(uuid),
        }
    }
}

record! {
    pub struct QueryPlayerResponse {
        /// Whether the player is online anywhere on the network
        pub found: bool => "found",
        pub username: Option<String> => "username",
        pub uuid: Option<Uuid> => "uuid",
    }
}

impl QueryPlayerResponse {
    pub fn found(username: impl Into<String>, uuid: Uuid) -> Self {
        Self {
            found: true,
            username: Some(username.into()),
            uuid: Some(uuid),
        }
    }

    pub fn not_found() -> Self {
        Self {
            found: false,
            username: None,
            uuid: None,
        }
    }
}

/// A concrete message variant of the catalog
pub trait Variant: Serialize + DeserializeOwned + Into<Message> + Send + 'static {
    /// Canonical wire tag
    const TAG: &'static str;
    const KIND: MessageKind;

    fn shape() -> VariantShape;

    /// Unwrap from a [`Message`], giving the message back on a kind mismatch
    fn from_message(message: Message) -> Result<Self, Message>;
}

/// The request half of an RPC pair
pub trait Request: Variant {
    type Response: Variant;
}

/// Builds the closed catalog: the `Message` union, its fieldless `MessageKind`
/// mirror and the exhaustive body codecs.
macro_rules! catalog {
    ($($kind:ident($ty:ident) => $tag:literal),* $(,)?) => {
        /// Any message of the catalog
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub enum Message {
            $($kind($ty),)*
        }

        /// Discriminant of a [`Message`]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum MessageKind {
            $($kind,)*
        }

        impl MessageKind {
            pub const ALL: &'static [MessageKind] = &[$(MessageKind::$kind,)*];

            pub fn canonical_tag(self) -> &'static str {
                match self {
                    $(MessageKind::$kind => <$ty as Variant>::TAG,)*
                }
            }

            pub fn shape(self) -> VariantShape {
                match self {
                    $(MessageKind::$kind => $ty::shape(),)*
                }
            }

            pub fn type_name(self) -> &'static str {
                match self {
                    $(MessageKind::$kind => stringify!($ty),)*
                }
            }

            /// Decode a body into this kind of message
            pub fn decode_body(self, format: BodyFormat, body: &[u8]) -> Result<Message, BodyError> {
                match self {
                    $(MessageKind::$kind => format.deserialize::<$ty>(body).map(Message::$kind),)*
                }
            }
        }

        impl Message {
            pub fn kind(&self) -> MessageKind {
                match self {
                    $(Message::$kind(_) => MessageKind::$kind,)*
                }
            }

            /// Serialize only the field set of this message
            pub fn encode_body(&self, format: BodyFormat) -> Result<Vec<u8>, BodyError> {
                match self {
                    $(Message::$kind(inner) => format.serialize(inner),)*
                }
            }
        }

        $(
            impl Variant for $ty {
                const TAG: &'static str = concat!("com.bluedragonmc.messages.", $tag);
                const KIND: MessageKind = MessageKind::$kind;

                fn shape() -> VariantShape {
                    $ty::shape()
                }

                fn from_message(message: Message) -> Result<Self, Message> {
                    match message {
                        Message::$kind(inner) => Ok(inner),
                        other => Err(other),
                    }
                }
            }

            impl From<$ty> for Message {
                fn from(value: $ty) -> Self {
                    Message::$kind(value)
                }
            }
        )*
    };
}

catalog! {
    Ping(PingMessage) => "PingMessage",
    GameStateUpdate(GameStateUpdateMessage) => "GameStateUpdateMessage",
    SendChat(SendChatMessage) => "SendChatMessage",
    RequestAddToQueue(RequestAddToQueueMessage) => "RequestAddToQueueMessage",
    RequestRemoveFromQueue(RequestRemoveFromQueueMessage) => "RequestRemoveFromQueueMessage",
    RequestCreateInstance(RequestCreateInstanceMessage) => "RequestCreateInstanceMessage",
    NotifyInstanceCreated(NotifyInstanceCreatedMessage) => "NotifyInstanceCreatedMessage",
    NotifyInstanceRemoved(NotifyInstanceRemovedMessage) => "NotifyInstanceRemovedMessage",
    SendPlayerToInstance(SendPlayerToInstanceMessage) => "SendPlayerToInstanceMessage",
    PlayJukeboxSong(PlayJukeboxSongMessage) => "PlayJukeboxSongMessage",
    PauseJukeboxSong(PauseJukeboxSongMessage) => "PauseJukeboxSongMessage",
    AddJukeboxSongToQueue(AddJukeboxSongToQueueMessage) => "AddJukeboxSongToQueueMessage",
    RemoveJukeboxSongFromQueue(RemoveJukeboxSongFromQueueMessage) => "RemoveJukeboxSongFromQueueMessage",
    GetJukeboxQueue(GetJukeboxQueueMessage) => "GetJukeboxQueueMessage",
    JukeboxQueueResponse(JukeboxQueueResponseMessage) => "JukeboxQueueResponseMessage",
    InvitePlayerToParty(InvitePlayerToPartyMessage) => "InvitePlayerToPartyMessage",
    AcceptPartyInvitation(AcceptPartyInvitationMessage) => "AcceptPartyInvitationMessage",
    RemovePlayerFromParty(RemovePlayerFromPartyMessage) => "RemovePlayerFromPartyMessage",
    PartyChat(PartyChatMessage) => "PartyChatMessage",
    PartyTransfer(PartyTransferMessage) => "PartyTransferMessage",
    PartyWarp(PartyWarpMessage) => "PartyWarpMessage",
    PartyList(PartyListMessage) => "PartyListMessage",
    SendFriendRequest(SendFriendRequestMessage) => "SendFriendRequestMessage",
    AcceptFriendRequest(AcceptFriendRequestMessage) => "AcceptFriendRequestMessage",
    RemoveFriend(RemoveFriendMessage) => "RemoveFriendMessage",
    RequestFriendList(RequestFriendListMessage) => "RequestFriendListMessage",
    FriendListResponse(FriendListResponseMessage) => "FriendListResponseMessage",
    RequestUpdate(RequestUpdateMessage) => "RequestUpdateMessage",
    ReportError(ReportErrorMessage) => "ReportErrorMessage",
    ServerSync(ServerSyncMessage) => "ServerSyncMessage",
    PlayerSync(PlayerSyncMessage) => "PlayerSyncMessage",
    QueryPlayer(QueryPlayerMessage) => "QueryPlayerMessage",
    QueryPlayerResponse(QueryPlayerResponse) => "QueryPlayerMessage.Response",
}

impl Request for GetJukeboxQueueMessage {
    type Response = JukeboxQueueResponseMessage;
}

impl Request for RequestFriendListMessage {
    type Response = FriendListResponseMessage;
}

impl Request for QueryPlayerMessage {
    type Response = QueryPlayerResponse;
}

impl Request for RequestCreateInstanceMessage {
    type Response = NotifyInstanceCreatedMessage;
}

impl MessageKind {
    /// Response kind paired with this request kind, if it is an RPC request
    pub fn response_kind(self) -> Option<MessageKind> {
        match self {
            MessageKind::GetJukeboxQueue => Some(MessageKind::JukeboxQueueResponse),
            MessageKind::RequestFriendList => Some(MessageKind::FriendListResponse),
            MessageKind::QueryPlayer => Some(MessageKind::QueryPlayerResponse),
            MessageKind::RequestCreateInstance => Some(MessageKind::NotifyInstanceCreated),
            _ => None,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

impl Message {
    /// Canonical wire tag of this message
    pub fn tag(&self) -> &'static str {
        self.kind().canonical_tag()
    }
}
