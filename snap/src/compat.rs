//! Object-type translation for the protocol-seven compatibility mode.

// Indexed by the protocol-six object type. Types withdrawn in protocol
// seven map to -1; the builder drops those items without emitting them.
const OBJ_SIX_TO_SEVEN: [i16; 16] = [
    0,  // type announce, identical in both protocols
    1,  // player input
    2,  // projectile
    3,  // laser
    4,  // pickup
    5,  // flag
    -1, // game info, replaced by split game data objects
    -1, // game data, replaced by split game data objects
    6,  // character core
    7,  // character
    8,  // player info
    9,  // client info
    10, // spectator info
    -1, // common event base, never snapped directly
    11, // explosion event
    12, // spawn event
];

pub(crate) fn obj_six_to_seven(type_id: i32) -> i32 {
    usize::try_from(type_id)
        .ok()
        .and_then(|index| OBJ_SIX_TO_SEVEN.get(index))
        .map_or(-1, |&mapped| i32::from(mapped))
}
