use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
#[error("topic {0:?} does not match <prefix>/<room>/<device>/")]
pub struct InvalidTopic(pub String);

/// Room and device names carried in a topic of the form `<prefix>/<room>/<device>/`.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TopicInfo {
    pub room_name: String,
    pub device_name: String,
}

impl TopicInfo {
    pub fn parse(prefix: &str, topic: &str) -> Result<Self, InvalidTopic> {
        let mut segments = topic.split('/');

        match (segments.next(), segments.next(), segments.next()) {
            (Some(head), Some(room_name), Some(device_name)) if head == prefix => Ok(Self {
                room_name: room_name.to_owned(),
                device_name: device_name.to_owned(),
            }),
            _ => Err(InvalidTopic(topic.to_owned())),
        }
    }
}
