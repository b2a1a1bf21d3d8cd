//! Room-booking tools shipped with the binary.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::tools::{ToolContext, ToolError, ToolRegistry, ToolResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum RoomType {
    ShuttleSimulator,
    NorthAtlantisLawn,
    VehicleAssemblyBuilding,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CapacityArgs {
    pub room_type: RoomType,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BookingArgs {
    pub room_type: RoomType,
    pub name: String,
    pub phone_number: String,
}

/// Number of people that fit in `room`.
///
/// # Errors
/// The shuttle simulator is no longer available.
pub fn room_capacity(room: RoomType) -> ToolResult<u32> {
    match room {
        RoomType::ShuttleSimulator => Err(unavailable()),
        RoomType::NorthAtlantisLawn => Ok(450),
        RoomType::VehicleAssemblyBuilding => Ok(12_000),
    }
}

/// Book `room` and return the confirmation number.
///
/// # Errors
/// Fails when the name or phone number is blank, or for the shuttle simulator.
pub fn book_room(args: &BookingArgs) -> ToolResult<String> {
    if args.name.trim().is_empty() {
        return Err(ToolError::failed("Name cannot be null or empty."));
    }
    if args.phone_number.trim().is_empty() {
        return Err(ToolError::failed("Phone number cannot be null or empty."));
    }
    tracing::info!(room = ?args.room_type, name = %args.name, "Booking room");
    match args.room_type {
        RoomType::ShuttleSimulator => Err(unavailable()),
        RoomType::NorthAtlantisLawn => Ok("1234".to_string()),
        RoomType::VehicleAssemblyBuilding => Ok("9876".to_string()),
    }
}

fn unavailable() -> ToolError {
    ToolError::failed("No longer available")
}

pub fn register(registry: &mut ToolRegistry) {
    registry.tool(
        "GetRoomCapacity",
        "Returns the number of people that can fit in a room.",
        |args: CapacityArgs, _ctx: ToolContext| async move { room_capacity(args.room_type) },
    );
    registry.tool(
        "BookRoom",
        "Books a room and returns the confirmation number",
        |args: BookingArgs, _ctx: ToolContext| async move { book_room(&args) },
    );
}
