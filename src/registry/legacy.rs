//! Legacy catalog aliases
//!
//! The first catalog revision was published without a package, so its tags are
//! bare class names. Peers still running it are decoded through aliases that
//! point at the canonical variant of the same shape.

use crate::protocol::MessageKind;

/// Bare tags of the first catalog revision and the variant each decodes to
pub const LEGACY_ALIASES: &[(&str, MessageKind)] = &[
    ("PingMessage", MessageKind::Ping),
    // Sent its delivery kind as `type`, accepted as an alias of `chatType`
    ("SendChatMessage", MessageKind::SendChat),
    ("RequestAddToQueueMessage", MessageKind::RequestAddToQueue),
    ("RequestRemoveFromQueueMessage", MessageKind::RequestRemoveFromQueue),
    ("RequestCreateInstanceMessage", MessageKind::RequestCreateInstance),
    ("NotifyInstanceCreatedMessage", MessageKind::NotifyInstanceCreated),
    ("PlayJukeboxSongMessage", MessageKind::PlayJukeboxSong),
    ("PauseJukeboxSongMessage", MessageKind::PauseJukeboxSong),
    ("AddJukeboxSongToQueueMessage", MessageKind::AddJukeboxSongToQueue),
    ("RemoveJukeboxSongFromQueueMessage", MessageKind::RemoveJukeboxSongFromQueue),
    ("GetJukeboxQueueMessage", MessageKind::GetJukeboxQueue),
    ("JukeboxQueueResponseMessage", MessageKind::JukeboxQueueResponse),
    ("InvitePlayerToPartyMessage", MessageKind::InvitePlayerToParty),
    ("AcceptPartyInvitationMessage", MessageKind::AcceptPartyInvitation),
    ("RemovePlayerFromPartyMessage", MessageKind::RemovePlayerFromParty),
    ("PartyChatMessage", MessageKind::PartyChat),
    ("SendFriendRequestMessage", MessageKind::SendFriendRequest),
    ("AcceptFriendRequestMessage", MessageKind::AcceptFriendRequest),
    ("RemoveFriendMessage", MessageKind::RemoveFriend),
    ("RequestFriendListMessage", MessageKind::RequestFriendList),
];

/// Legacy tags whose shape is incompatible with any canonical variant.
/// They are never registered and must not be reused.
pub const RETIRED_TAGS: &[&str] = &[
    // Carried only `player`; the canonical response carries the friend map
    "FriendListResponseMessage",
];

pub fn is_retired(tag: &str) -> bool {
    RETIRED_TAGS.contains(&tag)
}
