//! Localized, display-ready error messages. The deployments this
//! serves run in English and Swahili; anything else falls back to
//! English.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Locale {
    #[default]
    English,
    Swahili,
}

impl Locale {
    /// Pick a locale from an `Accept-Language` header. Only the primary
    /// subtag matters; quality weights are ignored beyond list order.
    pub fn from_accept_language(header: Option<&str>) -> Self {
        let Some(header) = header else {
            return Locale::English;
        };
        for part in header.split(',') {
            let tag = part.split(';').next().unwrap_or("").trim().to_lowercase();
            if tag == "sw" || tag.starts_with("sw-") {
                return Locale::Swahili;
            }
            if tag == "en" || tag.starts_with("en-") || tag == "*" {
                return Locale::English;
            }
        }
        Locale::English
    }

    /// Display text for a machine error code. Unknown codes get the
    /// generic internal-error message rather than leaking detail.
    pub fn message(&self, code: &str) -> &'static str {
        match (self, code) {
            (Locale::English, "tenant_not_found") => {
                "This organization does not exist or is no longer available."
            }
            (Locale::Swahili, "tenant_not_found") => {
                "Shirika hili halipo au halipatikani tena."
            }
            (Locale::English, "tenant_inactive") => {
                "This organization's account is suspended. Please contact support."
            }
            (Locale::Swahili, "tenant_inactive") => {
                "Akaunti ya shirika hili imesimamishwa. Tafadhali wasiliana na msaada."
            }
            (Locale::English, "subscription_expired") => {
                "This organization's subscription has ended. Renew it to continue."
            }
            (Locale::Swahili, "subscription_expired") => {
                "Usajili wa shirika hili umekwisha. Fanya malipo ili kuendelea."
            }
            (Locale::English, "session_invalid") => {
                "Your session is no longer valid. Please sign in again."
            }
            (Locale::Swahili, "session_invalid") => {
                "Kipindi chako si halali tena. Tafadhali ingia tena."
            }
            (Locale::English, "context_switch_denied") => {
                "You are not allowed to switch into another organization."
            }
            (Locale::Swahili, "context_switch_denied") => {
                "Huna ruhusa ya kuingia katika shirika jingine."
            }
            (Locale::English, "quota_exceeded") => {
                "Your plan's monthly limit for this feature has been reached."
            }
            (Locale::Swahili, "quota_exceeded") => {
                "Kikomo cha mwezi cha mpango wako kwa huduma hii kimefikiwa."
            }
            (Locale::English, "invalid_credentials") => "Invalid username or password.",
            (Locale::Swahili, "invalid_credentials") => {
                "Jina la mtumiaji au nenosiri si sahihi."
            }
            (Locale::English, "missing_auth") => {
                "Authorization header with a bearer token is required."
            }
            (Locale::Swahili, "missing_auth") => "Uthibitisho unahitajika.",
            (Locale::English, "invalid_token") => "The bearer token is invalid or expired.",
            (Locale::Swahili, "invalid_token") => "Tokeni si halali au imekwisha.",
            (Locale::English, "forbidden") => {
                "You do not have permission to perform this action."
            }
            (Locale::Swahili, "forbidden") => "Huna ruhusa ya kutekeleza kitendo hiki.",
            (Locale::English, "member_not_found") => "No such member in this organization.",
            (Locale::Swahili, "member_not_found") => "Mwanachama huyu hayupo katika shirika hili.",
            (Locale::English, "validation_failed") => "The request did not pass validation.",
            (Locale::Swahili, "validation_failed") => "Ombi halikukidhi masharti.",
            (Locale::English, "slug_taken") => "An organization with this identifier already exists.",
            (Locale::Swahili, "slug_taken") => "Shirika lenye kitambulisho hiki tayari lipo.",
            (Locale::English, _) => "An internal error occurred. Please try again later.",
            (Locale::Swahili, _) => "Hitilafu ya ndani imetokea. Tafadhali jaribu tena baadaye.",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_parsing_prefers_the_first_known_tag() {
        assert_eq!(Locale::from_accept_language(None), Locale::English);
        assert_eq!(Locale::from_accept_language(Some("sw")), Locale::Swahili);
        assert_eq!(
            Locale::from_accept_language(Some("sw-KE,en;q=0.8")),
            Locale::Swahili
        );
        assert_eq!(
            Locale::from_accept_language(Some("en-GB,sw;q=0.9")),
            Locale::English
        );
        assert_eq!(Locale::from_accept_language(Some("fr-FR")), Locale::English);
        assert_eq!(
            Locale::from_accept_language(Some("fr, sw;q=0.5")),
            Locale::Swahili
        );
    }

    #[test]
    fn every_status_code_has_text_in_both_languages() {
        let codes = [
            "tenant_not_found",
            "tenant_inactive",
            "subscription_expired",
            "session_invalid",
            "context_switch_denied",
            "quota_exceeded",
            "invalid_credentials",
            "forbidden",
        ];
        for code in codes {
            assert!(!Locale::English.message(code).is_empty());
            let sw = Locale::Swahili.message(code);
            assert!(!sw.is_empty());
            assert_ne!(sw, Locale::English.message(code));
        }
    }

    #[test]
    fn unknown_codes_fall_back_to_the_generic_message() {
        assert_eq!(
            Locale::English.message("storage_error"),
            Locale::English.message("never_seen_before")
        );
    }
}
