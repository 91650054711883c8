//! Channel resolution: which single channel a guest is notified on.

use crate::contact::{normalize_email, normalize_phone};
use crate::core::{Channel, Guest, NotificationSettings};

/// Returns every channel the guest can be reached on, best first.
///
/// A channel is available when the wedding enables it and the guest has a
/// valid contact for it. Order follows the wedding's priority list, with
/// enabled channels missing from that list appended in default order. A
/// guest's preferred channel, when available, always comes first.
pub fn available_channels(
    guest: &Guest,
    settings: &NotificationSettings,
    default_country_code: Option<&str>,
) -> Vec<Channel> {
    let has_email = guest
        .email
        .as_deref()
        .and_then(normalize_email)
        .is_some();
    let has_phone = guest
        .phone
        .as_deref()
        .and_then(|p| normalize_phone(p, default_country_code))
        .is_some();

    let reachable = |channel: Channel| match channel {
        Channel::Email => has_email,
        Channel::Sms | Channel::WhatsApp => has_phone,
    };

    let mut ordered: Vec<Channel> = Vec::with_capacity(3);
    for channel in settings
        .channel_priority
        .iter()
        .chain(Channel::DEFAULT_PRIORITY.iter())
        .copied()
    {
        if !ordered.contains(&channel) && settings.is_enabled(channel) && reachable(channel) {
            ordered.push(channel);
        }
    }

    if let Some(preferred) = guest.preferred_channel {
        if let Some(pos) = ordered.iter().position(|c| *c == preferred) {
            let channel = ordered.remove(pos);
            ordered.insert(0, channel);
        }
    }

    ordered
}

/// Picks the one channel a notification for this guest should go out on.
pub fn determine_best_channel(
    guest: &Guest,
    settings: &NotificationSettings,
    default_country_code: Option<&str>,
) -> Option<Channel> {
    available_channels(guest, settings, default_country_code)
        .into_iter()
        .next()
}

/// The normalized address for the guest on the given channel.
pub fn resolve_recipient(
    guest: &Guest,
    channel: Channel,
    default_country_code: Option<&str>,
) -> Option<String> {
    match channel {
        Channel::Email => guest.email.as_deref().and_then(normalize_email),
        Channel::Sms | Channel::WhatsApp => guest
            .phone
            .as_deref()
            .and_then(|p| normalize_phone(p, default_country_code)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guest(email: Option<&str>, phone: Option<&str>) -> Guest {
        Guest {
            id: "g1".into(),
            first_name: "Ana".into(),
            email: email.map(String::from),
            phone: phone.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn test_email_wins_by_default() {
        let g = guest(Some("ana@example.com"), Some("+14155550100"));
        let settings = NotificationSettings::default();
        assert_eq!(determine_best_channel(&g, &settings, None), Some(Channel::Email));
        assert_eq!(
            available_channels(&g, &settings, None),
            vec![Channel::Email, Channel::WhatsApp, Channel::Sms]
        );
    }

    #[test]
    fn test_phone_only_guest_gets_whatsapp() {
        let g = guest(None, Some("+14155550100"));
        let settings = NotificationSettings::default();
        assert_eq!(determine_best_channel(&g, &settings, None), Some(Channel::WhatsApp));
    }

    #[test]
    fn test_disabled_channel_is_never_selected() {
        let g = guest(Some("ana@example.com"), Some("+14155550100"));
        let settings = NotificationSettings {
            enabled_channels: vec![Channel::Sms],
            ..Default::default()
        };
        assert_eq!(available_channels(&g, &settings, None), vec![Channel::Sms]);
    }

    #[test]
    fn test_invalid_contacts_yield_no_channel() {
        let g = guest(Some("not-an-email"), Some("call me maybe"));
        assert_eq!(
            determine_best_channel(&g, &NotificationSettings::default(), Some("1")),
            None
        );
    }

    #[test]
    fn test_custom_priority_and_missing_entries() {
        let g = guest(Some("ana@example.com"), Some("+14155550100"));
        let settings = NotificationSettings {
            channel_priority: vec![Channel::Sms, Channel::Sms],
            ..Default::default()
        };
        assert_eq!(
            available_channels(&g, &settings, None),
            vec![Channel::Sms, Channel::Email, Channel::WhatsApp]
        );
    }

    #[test]
    fn test_preferred_channel_moves_to_front_only_when_available() {
        let mut g = guest(Some("ana@example.com"), Some("+14155550100"));
        g.preferred_channel = Some(Channel::Sms);
        let settings = NotificationSettings::default();
        assert_eq!(determine_best_channel(&g, &settings, None), Some(Channel::Sms));

        let email_only = NotificationSettings {
            enabled_channels: vec![Channel::Email],
            ..Default::default()
        };
        assert_eq!(determine_best_channel(&g, &email_only, None), Some(Channel::Email));
    }

    #[test]
    fn test_recipient_is_normalized() {
        let g = guest(Some(" Ana@Example.com"), Some("020 7946 0958"));
        assert_eq!(
            resolve_recipient(&g, Channel::Email, None).as_deref(),
            Some("ana@example.com")
        );
        assert_eq!(
            resolve_recipient(&g, Channel::WhatsApp, Some("44")).as_deref(),
            Some("+442079460958")
        );
    }
}
