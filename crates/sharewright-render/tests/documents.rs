//! Structural editing across renderers: idempotence, isolation and round trips.

use sharewright_render::{renderer_for, RenderError, Renderer};
use sharewright_schema::{Protocol, ShareDefinition};

fn sample(protocol: Protocol, tag: &str) -> ShareDefinition {
    match protocol {
        Protocol::Smb => {
            let mut share =
                ShareDefinition::new(Protocol::Smb, tag, format!("/mnt/shares/{tag}"));
            share.guest_allowed = true;
            share
        }
        Protocol::Nfs => {
            let mut share = ShareDefinition::nfs_export(format!("/mnt/shares/{tag}"));
            share.allowed_clients = vec!["192.168.1.0/24".to_owned(), "@admins".to_owned()];
            share
        }
        Protocol::Ftp => ShareDefinition::new(Protocol::Ftp, tag, format!("/srv/ftp/{tag}")),
    }
}

fn apply(renderer: &dyn Renderer, document: &str, share: &ShareDefinition) -> String {
    let fragment = renderer.render(share).unwrap();
    renderer.upsert(document, &fragment)
}

#[test]
fn applying_twice_yields_identical_document() {
    for protocol in Protocol::ALL {
        let renderer = renderer_for(protocol);
        let share = sample(protocol, "alpha");
        let once = apply(renderer.as_ref(), "", &share);
        let twice = apply(renderer.as_ref(), &once, &share);
        assert_eq!(once, twice, "{protocol}");
    }
}

#[test]
fn editing_one_share_never_touches_another() {
    for protocol in Protocol::ALL {
        let renderer = renderer_for(protocol);
        let a = sample(protocol, "alpha");
        let mut b = sample(protocol, "beta");

        let doc = apply(renderer.as_ref(), "", &a);
        let doc = apply(renderer.as_ref(), &doc, &b);
        let a_bytes = {
            let range = renderer.locate(&doc, &a.name).unwrap();
            doc[range].to_owned()
        };

        b.read_only = true;
        let updated = apply(renderer.as_ref(), &doc, &b);
        let range = renderer.locate(&updated, &a.name).unwrap();
        assert_eq!(updated[range], a_bytes, "{protocol}: update of beta");

        let removed = renderer.remove(&updated, &b.name);
        let range = renderer.locate(&removed, &a.name).unwrap();
        assert_eq!(removed[range], a_bytes, "{protocol}: removal of beta");
        assert!(renderer.locate(&removed, &b.name).is_none());
    }
}

#[test]
fn parse_inverts_render() {
    for protocol in Protocol::ALL {
        let renderer = renderer_for(protocol);
        let a = sample(protocol, "alpha").normalize().unwrap();
        let b = sample(protocol, "beta").normalize().unwrap();
        let doc = apply(renderer.as_ref(), "", &a);
        let doc = apply(renderer.as_ref(), &doc, &b);
        assert_eq!(renderer.parse(&doc).unwrap(), vec![a, b], "{protocol}");
        assert!(renderer.lint(&doc).is_empty(), "{protocol}");
    }
}

#[test]
fn removing_everything_empties_the_document() {
    for protocol in Protocol::ALL {
        let renderer = renderer_for(protocol);
        let a = sample(protocol, "alpha");
        let b = sample(protocol, "beta");
        let doc = apply(renderer.as_ref(), "", &a);
        let doc = apply(renderer.as_ref(), &doc, &b);
        let doc = renderer.remove(&doc, &a.name);
        let doc = renderer.remove(&doc, &b.name);
        assert_eq!(doc, "", "{protocol}");
    }
}

#[test]
fn paths_a_config_parser_would_alter_are_rejected() {
    for path in ["/mnt/docs ", "/mnt/docs\t", " /mnt/docs", "/mnt/docs\\"] {
        for protocol in Protocol::ALL {
            let share = match protocol {
                Protocol::Nfs => ShareDefinition::nfs_export(path),
                _ => ShareDefinition::new(protocol, "docs", path),
            };
            let result = renderer_for(protocol).render(&share);
            assert!(
                matches!(result, Err(RenderError::Schema(_))),
                "{protocol}: {path:?} rendered as {result:?}"
            );
        }
    }
}

#[test]
fn inner_spaces_and_backslashes_survive_a_round_trip() {
    for path in ["/mnt/my docs", "/mnt/back\\slash"] {
        for protocol in [Protocol::Smb, Protocol::Ftp] {
            let renderer = renderer_for(protocol);
            let share = ShareDefinition::new(protocol, "docs", path)
                .normalize()
                .unwrap();
            let doc = apply(renderer.as_ref(), "", &share);
            assert_eq!(renderer.parse(&doc).unwrap(), vec![share], "{protocol}: {path:?}");
        }
    }
}
