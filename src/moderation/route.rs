//! Route classifier: decides which stages a message goes through.

use crate::moderation::types::RouteType;

/// Derive the route from the template's delivery method.
///
/// `congressional` iff the method is exactly the legislative-routing
/// identifier. Near misses (case, padding) are direct outreach, since the
/// raw method is what the delivery system routes on.
pub fn classify_route(delivery_method: &str, legislative_route_id: &str) -> RouteType {
    if !legislative_route_id.is_empty() && delivery_method == legislative_route_id {
        RouteType::Congressional
    } else {
        RouteType::DirectOutreach
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legislative_identifier_is_congressional() {
        assert_eq!(classify_route("cwc", "cwc"), RouteType::Congressional);
    }

    #[test]
    fn near_miss_methods_get_full_review() {
        assert_eq!(classify_route(" CWC ", "cwc"), RouteType::DirectOutreach);
        assert_eq!(classify_route("CWC ", "cwc"), RouteType::DirectOutreach);
        assert_eq!(classify_route("Cwc", "cwc"), RouteType::DirectOutreach);
        assert_eq!(classify_route("cwc\n", "cwc"), RouteType::DirectOutreach);
    }

    #[test]
    fn everything_else_is_direct_outreach() {
        assert_eq!(classify_route("email", "cwc"), RouteType::DirectOutreach);
        assert_eq!(classify_route("", "cwc"), RouteType::DirectOutreach);
        assert_eq!(classify_route("cwc-email", "cwc"), RouteType::DirectOutreach);
    }

    #[test]
    fn empty_identifier_never_matches() {
        assert_eq!(classify_route("", ""), RouteType::DirectOutreach);
    }
}
