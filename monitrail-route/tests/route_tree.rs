use monitrail_route::{
    ActionConfiguration, HandlerConfiguration, MatchOptions, MetaConfiguration, RouteConfiguration,
    RouteError, RouteResolver, SubRouteConfiguration, TopicPredicate,
};
use std::sync::Arc;

fn wildcard(pattern: &str) -> TopicPredicate {
    TopicPredicate::wildcard(pattern, MatchOptions::default()).unwrap()
}

fn file(name: &str, path: &str) -> ActionConfiguration {
    ActionConfiguration::Add(HandlerConfiguration::new("TextFile", name).with_attribute("Path", path))
}

/// Root logs everything to a file; Sql topics also go to a dedicated
/// sequence; Sql.Slow topics use the root's declared console action
fn service_routes() -> RouteConfiguration {
    RouteConfiguration::new("")
        .declare_action(ActionConfiguration::handler("Console", "console"))
        .add_action(file("all", "logs/all.log"))
        .declare_route(
            SubRouteConfiguration::new(
                RouteConfiguration::new("Sql")
                    .with_namespace("Db.")
                    .add_action(ActionConfiguration::sequence(
                        "sql-chain",
                        vec![file("sql", "logs/sql.log"), ActionConfiguration::handler("Console", "sql-console")],
                    ))
                    .declare_route(SubRouteConfiguration::new(
                        RouteConfiguration::new("Slow").use_declared_action("console"),
                        TopicPredicate::regex(r"\bslow\b", MatchOptions::default()).unwrap(),
                    )),
                wildcard("Sql.*"),
            ),
        )
}

#[test]
fn test_service_routes_resolution() {
    let resolved = RouteResolver::resolve(&service_routes()).unwrap();

    let chain = |topic: &str| -> Vec<String> {
        resolved
            .collect_actions(topic)
            .iter()
            .map(|a| a.name().to_string())
            .collect()
    };

    assert_eq!(chain("Web.Request"), vec!["all"]);
    assert_eq!(chain("Sql.Insert"), vec!["all", "sql-chain"]);
    assert_eq!(chain("Sql.Query slow"), vec!["all", "sql-chain", "console"]);
    // regex semantics: word boundary, case-insensitive by default
    assert_eq!(chain("Sql.SLOW"), vec!["all", "sql-chain", "console"]);
    assert_eq!(chain("Sql.Slowest"), vec!["all", "sql-chain"]);

    assert_eq!(resolved.matching_routes("Sql.slow"), vec!["", "Db.Sql", "Db.Slow"]);
}

#[test]
fn test_failed_resolution_reports_first_error() {
    let mut config = service_routes();
    config.push(MetaConfiguration::DeclareRoute(SubRouteConfiguration::new(
        RouteConfiguration::new("Sql").with_namespace("Db."),
        wildcard("*"),
    )));
    let err = RouteResolver::resolve(&config).unwrap_err();
    assert_eq!(err, RouteError::DuplicateRoute("Db.Sql".to_string()));
    assert_eq!(err.to_string(), "Route named 'Db.Sql' is already declared");
}

#[test]
fn test_every_action_materialized_once() {
    let config = service_routes().declare_route(
        SubRouteConfiguration::new(RouteConfiguration::new("Audit"), wildcard("Audit*"))
            .import_parent_actions(true),
    );
    let resolved = RouteResolver::resolve(&config).unwrap();
    let all = resolved.all_actions();
    let names: Vec<_> = all.iter().map(|a| a.name()).collect();
    assert_eq!(names, vec!["all", "sql-chain", "console"]);

    let audit = resolved.sub_routes().iter().find(|r| r.full_name() == "Audit").unwrap();
    assert!(Arc::ptr_eq(&audit.actions()[0], &all[0]));
}
