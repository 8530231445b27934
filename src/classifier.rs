use crate::power::ProtocolVersion;

pub const V1_NAME_PREFIX: &str = "HTC BS ";
pub const V2_NAME_PREFIX: &str = "LHB-";

/// Protocol generation of an advertised device, or `None` when it is not a lighthouse.
pub fn classify(name: Option<&str>) -> Option<ProtocolVersion> {
    let name = name?;
    if name.starts_with(V1_NAME_PREFIX) {
        Some(ProtocolVersion::V1)
    } else if name.starts_with(V2_NAME_PREFIX) {
        Some(ProtocolVersion::V2)
    } else {
        None
    }
}
