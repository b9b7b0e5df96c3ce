use uuid::Uuid;

const fn vendor(short: u32) -> Uuid {
    Uuid::from_u128(((short as u128) << 96) | 0x8d6d_82b8_614a_1c8c_b0f8_dcc6)
}

pub const SERVICE: Uuid = vendor(0x6108_0001);

/// The notification and write channels the strap exposes under [`SERVICE`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
pub enum Channel {
    #[display(fmt = "CMD_TO_STRAP")]
    CmdToStrap,
    #[display(fmt = "CMD_FROM_STRAP")]
    CmdFromStrap,
    #[display(fmt = "EVENTS_FROM_STRAP")]
    EventsFromStrap,
    #[display(fmt = "DATA_FROM_STRAP")]
    DataFromStrap,
    #[display(fmt = "DIAGNOSTIC")]
    Diagnostic,
}

impl Channel {
    pub const ALL: [Channel; 5] = [
        Channel::CmdToStrap,
        Channel::CmdFromStrap,
        Channel::EventsFromStrap,
        Channel::DataFromStrap,
        Channel::Diagnostic,
    ];

    pub const fn uuid(self) -> Uuid {
        match self {
            Channel::CmdToStrap => vendor(0x6108_0002),
            Channel::CmdFromStrap => vendor(0x6108_0003),
            Channel::EventsFromStrap => vendor(0x6108_0004),
            Channel::DataFromStrap => vendor(0x6108_0005),
            Channel::Diagnostic => vendor(0x6108_0007),
        }
    }

    /// Whether session setup fails without this channel.
    #[inline]
    pub const fn required(self) -> bool {
        !matches!(self, Channel::Diagnostic)
    }

    #[inline]
    pub const fn notifies(self) -> bool {
        !matches!(self, Channel::CmdToStrap)
    }

    pub fn from_uuid(uuid: Uuid) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.uuid() == uuid)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn vendor_identifiers() {
        assert_eq!(SERVICE.to_string(), "61080001-8d6d-82b8-614a-1c8cb0f8dcc6");
        assert_eq!(
            Channel::CmdToStrap.uuid().to_string(),
            "61080002-8d6d-82b8-614a-1c8cb0f8dcc6"
        );
        assert_eq!(
            Channel::Diagnostic.uuid().to_string(),
            "61080007-8d6d-82b8-614a-1c8cb0f8dcc6"
        );
    }

    #[test]
    fn uuid_lookup() {
        for channel in Channel::ALL {
            assert_eq!(Channel::from_uuid(channel.uuid()), Some(channel));
        }

        assert_eq!(Channel::from_uuid(SERVICE), None);
    }
}
