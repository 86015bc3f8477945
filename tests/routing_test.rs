use portmux::routing::{derive_bindings, derive_sniff_table, RouteTable};
use portmux::rules::{RouteRule, RuleKind, RuleSet, Target};

fn rule(kind: RuleKind, key: &str, target: &str, port: Option<u16>) -> RouteRule {
    RouteRule::new(kind, key, Target::parse(target).unwrap(), port)
}

fn request(host: &str, path: &str) -> hyper::Request<()> {
    hyper::Request::builder()
        .uri(path)
        .header(hyper::header::HOST, host)
        .body(())
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_prefix_respects_segment_boundary() {
        let table = RouteTable::new(
            8080,
            vec![rule(RuleKind::Path, "/api", "http://127.0.0.1:3000", None)],
        );

        let found = table.find("example.com", "/api/users").unwrap();
        assert_eq!(found.rule.key, "/api");
        assert_eq!(found.strip_prefix, Some("/api"));

        assert!(table.find("example.com", "/api").is_some());
        assert!(table.find("example.com", "/apiary").is_none());
        assert!(table.find("example.com", "/").is_none());
    }

    #[test]
    fn test_longest_path_prefix_wins() {
        let table = RouteTable::new(
            8080,
            vec![
                rule(RuleKind::Path, "/api", "http://127.0.0.1:3000", None),
                rule(RuleKind::Path, "/api/v2", "http://127.0.0.1:3002", None),
                rule(RuleKind::Path, "/", "http://127.0.0.1:3999", None),
            ],
        );

        assert_eq!(table.find("h", "/api/v2/items").unwrap().rule.key, "/api/v2");
        assert_eq!(table.find("h", "/api/v1/items").unwrap().rule.key, "/api");
        assert_eq!(table.find("h", "/other").unwrap().rule.key, "/");
    }

    #[test]
    fn test_subdomain_matches_exact_first_label() {
        let table = RouteTable::new(
            8080,
            vec![rule(RuleKind::Subdomain, "admin", "http://127.0.0.1:4000", None)],
        );

        assert!(table.find("admin.example.com", "/").is_some());
        assert!(table.find("administrator.example.com", "/").is_none());
        assert!(table.find("admin", "/").is_none());

        // 포트와 대소문자는 정규화된다
        let req = request("Admin.Example.com:8080", "/dashboard");
        let found = table.route_request(&req).unwrap();
        assert_eq!(found.rule.key, "admin");
        assert_eq!(found.strip_prefix, None);
    }

    #[test]
    fn test_domain_before_subdomain_before_path() {
        let table = RouteTable::new(
            8080,
            vec![
                rule(RuleKind::Path, "/", "http://127.0.0.1:3000", None),
                rule(RuleKind::Subdomain, "app", "http://127.0.0.1:3001", None),
                rule(RuleKind::Domain, "app.example.com", "http://127.0.0.1:3002", None),
            ],
        );

        assert_eq!(table.find("app.example.com", "/").unwrap().rule.kind, RuleKind::Domain);
        assert_eq!(table.find("app.other.com", "/").unwrap().rule.kind, RuleKind::Subdomain);
        assert_eq!(table.find("www.other.com", "/").unwrap().rule.kind, RuleKind::Path);
    }

    #[test]
    fn test_explicit_port_rules_come_first() {
        let table = RouteTable::new(
            8080,
            vec![
                rule(RuleKind::Domain, "app.example.com", "http://127.0.0.1:3000", None),
                rule(RuleKind::Path, "/", "http://127.0.0.1:3001", Some(8080)),
            ],
        );

        let found = table.find("app.example.com", "/").unwrap();
        assert_eq!(found.rule.explicit_port, Some(8080));
    }

    #[test]
    fn test_match_order_is_deterministic() {
        let rules = vec![
            rule(RuleKind::Path, "/b", "http://127.0.0.1:3002", None),
            rule(RuleKind::Path, "/a", "http://127.0.0.1:3001", None),
            rule(RuleKind::Subdomain, "x", "http://127.0.0.1:3003", None),
        ];
        let mut reversed = rules.clone();
        reversed.reverse();

        let first = RouteTable::new(8080, rules);
        let second = RouteTable::new(8080, reversed);
        assert_eq!(first.rules(), second.rules());
        assert_eq!(first.rules()[0].key, "x");
        assert_eq!(first.rules()[1].key, "/a");
    }

    #[test]
    fn test_missing_host_still_matches_path_rules() {
        let table = RouteTable::new(
            8080,
            vec![
                rule(RuleKind::Subdomain, "admin", "http://127.0.0.1:4000", None),
                rule(RuleKind::Path, "/api", "http://127.0.0.1:3000", None),
            ],
        );

        let req = hyper::Request::builder().uri("/api/x").body(()).unwrap();
        assert_eq!(table.route_request(&req).unwrap().rule.key, "/api");

        let req = hyper::Request::builder().uri("/nothing").body(()).unwrap();
        assert!(table.route_request(&req).is_err());
    }

    #[test]
    fn test_bindings_per_allowed_port() {
        let rules = RuleSet::from_json_str(
            r#"{
                "path": { "/api": "http://127.0.0.1:3000" },
                "subdomain": {
                    "admin": { "target": "http://127.0.0.1:4000", "port": 8081 },
                    "git": "tcp://127.0.0.1:22"
                },
                "domain": { "orphan.local": { "target": "http://127.0.0.1:5000", "port": 9999 } },
                "tcp": { "ssh": "tcp://127.0.0.1:2200" },
                "allowed_ports": [8080, 8081, 8082]
            }"#,
        )
        .unwrap();

        let bindings = derive_bindings(&rules);
        let ports: Vec<u16> = bindings.iter().map(|b| b.port).collect();
        assert_eq!(ports, vec![8080, 8081, 8082]);

        let keys = |port: u16| -> Vec<String> {
            bindings
                .iter()
                .find(|b| b.port == port)
                .unwrap()
                .rules
                .iter()
                .map(|r| r.key.clone())
                .collect()
        };

        // 명시 포트 규칙은 그 포트에만, 허용되지 않은 포트의 규칙은 어디에도 없다
        assert_eq!(keys(8080), vec!["/api"]);
        assert_eq!(keys(8081), vec!["admin", "/api"]);
        assert_eq!(keys(8082), vec!["/api"]);

        // tcp 대상은 HTTP 바인딩에 실리지 않고 스니핑 테이블로 간다
        let sniff = derive_sniff_table(&rules);
        assert_eq!(sniff.len(), 2);
        assert_eq!(sniff.find("git.example.com").unwrap().target.as_str(), "tcp://127.0.0.1:22");
        assert_eq!(sniff.find("ssh.example.com:2222").unwrap().target.as_str(), "tcp://127.0.0.1:2200");
        assert!(sniff.find("www.example.com").is_none());
    }

    #[test]
    fn test_port_without_rules_has_empty_binding() {
        let rules = RuleSet::from_json_str(
            r#"{
                "path": { "/api": { "target": "http://127.0.0.1:3000", "port": 8080 } },
                "allowed_ports": [8080, 8081]
            }"#,
        )
        .unwrap();

        let bindings = derive_bindings(&rules);
        assert!(!bindings[0].is_empty());
        assert!(bindings[1].is_empty());
        assert!(derive_sniff_table(&rules).is_empty());
    }
}
