//! Room naming for Parley.
//!
//! Every user has a private room `user:{id}` and every group a
//! conversation room `group:{id}`.

/// Maximum room name length.
pub const MAX_ROOM_NAME_LENGTH: usize = 256;

/// Prefix of private per-user rooms.
pub const USER_ROOM_PREFIX: &str = "user:";

/// Prefix of group conversation rooms.
pub const GROUP_ROOM_PREFIX: &str = "group:";

/// The private room of a user.
#[must_use]
pub fn user_room(user_id: &str) -> String {
    format!("{USER_ROOM_PREFIX}{user_id}")
}

/// The conversation room of a group.
#[must_use]
pub fn group_room(group_id: &str) -> String {
    format!("{GROUP_ROOM_PREFIX}{group_id}")
}

/// Validate a room name.
///
/// # Errors
///
/// Returns an error message if the room name is invalid.
pub fn validate_room_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Room name cannot be empty");
    }
    if name.len() > MAX_ROOM_NAME_LENGTH {
        return Err("Room name too long");
    }
    if name.starts_with('$') {
        return Err("Room names starting with '$' are reserved");
    }
    if !name.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err("Room name contains invalid characters");
    }
    Ok(())
}
