mod test_utils;

use std::sync::Arc;

use ip_firewall::persistence::{MemoryStore, PersistenceStore};
use ip_firewall::core::EntrySource;
use ip_firewall::utils::{Clock, MockClock};
use ip_firewall::{ActionSignal, Classification, Firewall, FirewallResult, ListOutcomeKind, Settings};
use test_utils::{build, plain, random_ip, StubGeo, StubHosts};

#[test_log::test(tokio::test)]
async fn test_blacklist_and_whitelist_are_mutually_exclusive() -> FirewallResult<()> {
    let t = plain(Settings::default());

    for _ in 0..20 {
        let ip = random_ip();
        let outcome = t.firewall.blacklist(&ip, false).await?;
        if outcome.kind == ListOutcomeKind::AlreadyListed {
            continue;
        }

        assert!(outcome.is_success(), "{}", outcome);
        assert!(t.firewall.is_blacklisted(&ip).await?);
        assert!(!t.firewall.is_whitelisted(&ip).await?);
    }

    Ok(())
}

#[tokio::test]
async fn test_blacklist_twice_is_a_no_op() -> FirewallResult<()> {
    let t = plain(Settings::default());

    let first = t.firewall.blacklist("10.17.12.1", false).await?;
    assert_eq!(first.message, "10.17.12.1 is now blacklisted");

    let second = t.firewall.blacklist("10.17.12.1", false).await?;
    assert_eq!(second.kind, ListOutcomeKind::AlreadyListed);
    assert_eq!(second.message, "10.17.12.1 is already blacklisted");
    assert_eq!(t.firewall.list_all().await?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_force_flips_classification() -> FirewallResult<()> {
    let t = plain(Settings::default());

    t.firewall.whitelist("10.17.12.2", false).await?;

    let refused = t.firewall.blacklist("10.17.12.2", false).await?;
    assert_eq!(refused.kind, ListOutcomeKind::ConflictingListing);
    assert!(t.firewall.is_whitelisted("10.17.12.2").await?);

    let forced = t.firewall.blacklist("10.17.12.2", true).await?;
    assert!(forced.is_success());
    assert!(t.firewall.is_blacklisted("10.17.12.2").await?);
    assert!(!t.firewall.is_whitelisted("10.17.12.2").await?);

    let entries = t.firewall.list_all().await?;
    assert_eq!(entries.len(), 1);
    assert!(!entries[0].whitelisted);

    Ok(())
}

#[tokio::test]
async fn test_invalid_addresses_are_rejected() -> FirewallResult<()> {
    let t = plain(Settings::default());

    for raw in ["256.1.1.1", "not an ip", "country:zz", "10.0.0.0/40"] {
        let outcome = t.firewall.blacklist(raw, false).await?;
        assert_eq!(outcome.kind, ListOutcomeKind::InvalidAddress, "{}", raw);
        assert_eq!(outcome.message, format!("{} is not a valid IP address", raw));
    }

    assert!(t.firewall.list_all().await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_cidr_boundaries() -> FirewallResult<()> {
    let t = plain(Settings::default());
    t.firewall.blacklist("192.168.17.0/24", false).await?;

    assert!(t.firewall.is_blacklisted("192.168.17.0").await?);
    assert!(t.firewall.is_blacklisted("192.168.17.1").await?);
    assert!(t.firewall.is_blacklisted("192.168.17.255").await?);
    assert!(!t.firewall.is_blacklisted("192.168.16.255").await?);
    assert!(!t.firewall.is_blacklisted("192.168.18.0").await?);

    Ok(())
}

#[tokio::test]
async fn test_netmask_form_is_normalized() -> FirewallResult<()> {
    let t = plain(Settings::default());

    t.firewall.whitelist("10.10.0.0/255.255.0.0", false).await?;
    assert!(t.firewall.is_whitelisted("10.10.200.3").await?);

    let again = t.firewall.whitelist("10.10.0.0/16", false).await?;
    assert_eq!(again.kind, ListOutcomeKind::AlreadyListed);

    Ok(())
}

#[tokio::test]
async fn test_wildcard_and_range() -> FirewallResult<()> {
    let t = plain(Settings::default());
    t.firewall.blacklist("172.17.*.*", false).await?;
    t.firewall.whitelist("10.0.0.1-10.0.0.255", false).await?;

    assert!(t.firewall.is_blacklisted("172.17.0.1").await?);
    assert!(t.firewall.is_blacklisted("172.17.255.255").await?);
    assert!(!t.firewall.is_blacklisted("172.18.0.1").await?);

    assert!(t.firewall.is_whitelisted("10.0.0.255").await?);
    assert!(!t.firewall.is_whitelisted("10.0.1.0").await?);

    Ok(())
}

#[tokio::test]
async fn test_host_entries() -> FirewallResult<()> {
    let hosts = StubHosts::default().with("office.example.com", "198.51.100.4");
    let t = build(Settings::default(), StubGeo::default(), hosts);

    t.firewall.whitelist("host:office.example.com", false).await?;

    assert!(t.firewall.is_whitelisted("198.51.100.4").await?);
    assert!(!t.firewall.is_whitelisted("198.51.100.5").await?);

    Ok(())
}

#[tokio::test]
async fn test_clear_empties_every_source() -> FirewallResult<()> {
    let settings = Settings {
        blacklist: vec!["10.0.0.1".to_string()],
        whitelist: vec!["10.0.0.0/24".to_string()],
        ..Settings::default()
    };
    let t = plain(settings);

    t.firewall.blacklist("10.1.0.1", false).await?;
    t.firewall.whitelist_on_session("10.2.0.1").await?;

    assert_eq!(t.firewall.clear().await?, 4);
    assert!(t.firewall.list_all().await?.is_empty());

    for address in ["10.0.0.1", "10.0.0.2", "10.1.0.1", "10.2.0.1"] {
        assert_eq!(t.firewall.classify(address).await?, Classification::Unclassified);
    }

    Ok(())
}

#[tokio::test]
async fn test_country_classification() -> FirewallResult<()> {
    let settings = Settings {
        enable_country_search: true,
        ..Settings::default()
    };
    let geo = StubGeo::default().with("8.8.8.8", "us").with("200.160.2.3", "br");
    let t = build(settings, geo, StubHosts::default());

    let outcome = t.firewall.blacklist("country:us", false).await?;
    assert!(outcome.is_success());

    assert!(t.firewall.is_blacklisted("8.8.8.8").await?);
    assert_eq!(t.firewall.classify("200.160.2.3").await?, Classification::Unclassified);
    assert_eq!(t.firewall.classify("192.0.2.1").await?, Classification::Unclassified);

    Ok(())
}

#[tokio::test]
async fn test_remove() -> FirewallResult<()> {
    let t = plain(Settings::default());
    t.firewall.blacklist("10.3.0.1", false).await?;

    let removed = t.firewall.remove("10.3.0.1").await?;
    assert_eq!(removed.message, "10.3.0.1 removed from blacklist");
    assert_eq!(t.firewall.classify("10.3.0.1").await?, Classification::Unclassified);

    let missing = t.firewall.remove("10.3.0.1").await?;
    assert_eq!(missing.kind, ListOutcomeKind::NotListed);
    assert_eq!(missing.message, "10.3.0.1 is not listed");

    Ok(())
}

#[tokio::test]
async fn test_session_lists() -> FirewallResult<()> {
    let t = plain(Settings::default());

    t.firewall.blacklist_on_session("10.4.0.1").await?;
    assert!(t.firewall.is_blacklisted("10.4.0.1").await?);

    t.firewall.whitelist_on_session("10.4.0.1").await?;
    assert!(t.firewall.is_whitelisted("10.4.0.1").await?);

    let entries = t.firewall.list_all().await?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].source, EntrySource::Session);

    assert!(t.firewall.remove_from_session("10.4.0.1").await?.is_success());
    assert_eq!(t.firewall.classify("10.4.0.1").await?, Classification::Unclassified);
    assert_eq!(
        t.firewall.remove_from_session("10.4.0.1").await?.kind,
        ListOutcomeKind::NotListed
    );

    Ok(())
}

#[tokio::test]
async fn test_session_cannot_contradict_static_entries() -> FirewallResult<()> {
    let settings = Settings {
        blacklist: vec!["10.9.0.1".to_string()],
        ..Settings::default()
    };
    let t = plain(settings);

    let outcome = t.firewall.whitelist_on_session("10.9.0.1").await?;
    assert_eq!(outcome.kind, ListOutcomeKind::ConflictingListing);
    assert!(!outcome.is_success());
    assert_eq!(t.firewall.classify("10.9.0.1").await?, Classification::Blacklisted);

    let again = t.firewall.blacklist_on_session("10.9.0.1").await?;
    assert_eq!(again.kind, ListOutcomeKind::AlreadyListed);

    let entries = t.firewall.list_all().await?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].source, EntrySource::StaticConfig);

    Ok(())
}

#[tokio::test]
async fn test_persistent_entries_come_first() -> FirewallResult<()> {
    let clock: Arc<dyn Clock> = Arc::new(MockClock::default());
    let store = Arc::new(MemoryStore::new(clock.clone()));
    let settings = Settings {
        blacklist: vec!["10.5.0.1".to_string()],
        ..Settings::default()
    };

    let firewall = Firewall::builder(settings)
        .clock(clock)
        .persistence(store.clone())
        .host_resolver(Arc::new(StubHosts::default()))
        .build();

    firewall.whitelist("10.5.0.2", false).await?;
    firewall.blacklist_on_session("10.5.0.3").await?;

    let stored = store.all().await?;
    assert_eq!(stored.len(), 1, "runtime additions go to the durable store");
    assert_eq!(stored[0].source, EntrySource::Persistent);

    let addresses: Vec<String> = firewall
        .list_all()
        .await?
        .into_iter()
        .map(|entry| entry.address)
        .collect();
    assert_eq!(addresses, vec!["10.5.0.2", "10.5.0.1", "10.5.0.3"]);

    Ok(())
}

#[tokio::test]
async fn test_cached_lookups_follow_changes() -> FirewallResult<()> {
    let settings = Settings {
        cache_ttl_seconds: 300,
        list_snapshot_ttl_seconds: 300,
        ..Settings::default()
    };
    let t = plain(settings);

    t.firewall.blacklist("10.6.0.0/16", false).await?;
    assert!(t.firewall.is_blacklisted("10.6.1.1").await?);
    assert!(t.firewall.find("10.6.0.0/16").await?.is_some());

    t.firewall.remove("10.6.0.0/16").await?;
    assert!(!t.firewall.is_blacklisted("10.6.1.1").await?);
    assert!(t.firewall.find("10.6.0.0/16").await?.is_none());

    Ok(())
}

#[tokio::test]
async fn test_check_request_signals() -> FirewallResult<()> {
    let mut settings = Settings {
        blacklist: vec!["10.7.0.1".to_string()],
        whitelist: vec!["10.7.0.2".to_string()],
        redirect_non_whitelisted_to: Some("/members-only".to_string()),
        ..Settings::default()
    };
    settings.response.message = Some("blocked".to_string());
    let t = plain(settings);

    let blocked = tokio_test::assert_ok!(t.firewall.check_request("10.7.0.1").await);
    assert_eq!(
        blocked,
        Some(ActionSignal::Block {
            code: 403,
            message: "blocked".to_string()
        })
    );

    assert_eq!(t.firewall.check_request("10.7.0.2").await?, None);
    assert_eq!(
        t.firewall.check_request("10.7.0.3").await?,
        Some(ActionSignal::redirect("/members-only"))
    );

    Ok(())
}

#[tokio::test]
async fn test_block_access_code_200_lets_requests_through() -> FirewallResult<()> {
    let mut settings = Settings {
        blacklist: vec!["10.8.0.1".to_string()],
        ..Settings::default()
    };
    settings.response.code = 200;
    let t = plain(settings);

    assert_eq!(t.firewall.block_access(), None);
    assert_eq!(t.firewall.check_request("10.8.0.1").await?, None);

    Ok(())
}

#[tokio::test]
async fn test_all_by_country() -> FirewallResult<()> {
    let geo = StubGeo::default().with("8.8.8.8", "us").with("200.160.2.3", "br");
    let t = build(Settings::default(), geo, StubHosts::default());

    t.firewall.blacklist("country:br", false).await?;
    t.firewall.blacklist("200.160.2.3", false).await?;
    t.firewall.blacklist("8.8.8.8", false).await?;

    let brazil: Vec<String> = t
        .firewall
        .all_by_country("br")
        .await?
        .into_iter()
        .map(|entry| entry.address)
        .collect();
    assert_eq!(brazil, vec!["country:br", "200.160.2.3"]);

    Ok(())
}
