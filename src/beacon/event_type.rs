//! Wire values for the `et` beacon field. See
//! `original_source/openkit/protocol/event_type.py`.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Action,
    ValueString,
    ValueInt,
    ValueDouble,
    NamedEvent,
    SessionStart,
    SessionEnd,
    WebRequest,
    Error,
    Crash,
    IdentifyUser,
}

impl EventType {
    pub fn as_beacon_value(self) -> u8 {
        match self {
            EventType::Action => 1,
            EventType::NamedEvent => 10,
            EventType::ValueString => 11,
            EventType::ValueInt => 12,
            EventType::ValueDouble => 13,
            EventType::SessionStart => 18,
            EventType::SessionEnd => 19,
            EventType::WebRequest => 30,
            EventType::Error => 40,
            EventType::Crash => 50,
            EventType::IdentifyUser => 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_values_match_protocol() {
        assert_eq!(EventType::Action.as_beacon_value(), 1);
        assert_eq!(EventType::SessionStart.as_beacon_value(), 18);
        assert_eq!(EventType::SessionEnd.as_beacon_value(), 19);
        assert_eq!(EventType::IdentifyUser.as_beacon_value(), 60);
    }
}
