//! Route configuration parser.
//!
//! The grammar is line-oriented: a `route` directive at the top level opens
//! a route block listing one or more domains, and indented `upstream`,
//! `provider` and `header` directives fill in that route. Keywords match
//! case-insensitively; `#` starts a comment; blank lines are ignored.
//!
//! ```text
//! route example.com www.example.com
//!     upstream localhost:8080
//!     provider acme
//!     header add strict-transport-security max-age=63072000
//!     header delete server
//! ```
//!
//! The parser is deliberately permissive about route completeness: a route
//! with no `upstream` parses cleanly and is rejected later by
//! [`Manager::set_routes`](crate::proxy::Manager::set_routes), keeping the
//! grammar and the semantic validation separable.

use std::path::Path;

use crate::proxy::{HeaderOp, HeaderRule, Route};

use super::error::{ConfigError, ConfigResult};

/// Parse a route configuration file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or does not conform to the
/// grammar.
pub fn parse_file<P: AsRef<Path>>(path: P) -> ConfigResult<Vec<Route>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_str(&content)
}

/// Parse route configuration from a string.
///
/// Returns the declared routes in file order; an empty input yields an
/// empty list.
///
/// # Errors
///
/// Returns an error naming the offending line if the input does not
/// conform to the grammar.
pub fn parse_str(input: &str) -> ConfigResult<Vec<Route>> {
    let mut routes = Vec::new();
    let mut current: Option<Route> = None;

    for (index, raw) in input.lines().enumerate() {
        let line = index + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let tokens: Vec<&str> = trimmed.split_whitespace().collect();
        let keyword = tokens[0].to_ascii_lowercase();

        match keyword.as_str() {
            "route" => {
                if tokens.len() < 2 {
                    return Err(ConfigError::MissingRouteDomains { line });
                }
                if let Some(route) = current.take() {
                    routes.push(route);
                }
                current = Some(Route::new(
                    tokens[1..].iter().map(ToString::to_string).collect(),
                ));
            }
            "upstream" => {
                let route = in_route(&mut current, line, "upstream")?;
                if tokens.len() != 2 {
                    return Err(ConfigError::WrongArgumentCount {
                        line,
                        directive: "upstream".to_string(),
                        expected: "a single host:port argument",
                    });
                }
                if route.upstream.is_some() {
                    return Err(ConfigError::DuplicateDirective {
                        line,
                        directive: "upstream".to_string(),
                    });
                }
                route.upstream = Some(tokens[1].to_string());
            }
            "provider" => {
                let route = in_route(&mut current, line, "provider")?;
                if tokens.len() != 2 {
                    return Err(ConfigError::WrongArgumentCount {
                        line,
                        directive: "provider".to_string(),
                        expected: "a single provider name",
                    });
                }
                if route.provider.is_some() {
                    return Err(ConfigError::DuplicateDirective {
                        line,
                        directive: "provider".to_string(),
                    });
                }
                route.provider = Some(tokens[1].to_string());
            }
            "header" => {
                let route = in_route(&mut current, line, "header")?;
                let rule = parse_header_rule(&tokens, line)?;
                route.headers.push(rule);
            }
            _ => {
                return Err(ConfigError::UnknownDirective {
                    line,
                    directive: tokens[0].to_string(),
                });
            }
        }
    }

    if let Some(route) = current.take() {
        routes.push(route);
    }

    Ok(routes)
}

/// Borrow the open route, or fail because the directive is at top level.
fn in_route<'a>(
    current: &'a mut Option<Route>,
    line: usize,
    directive: &str,
) -> ConfigResult<&'a mut Route> {
    current.as_mut().ok_or_else(|| ConfigError::OutsideRoute {
        line,
        directive: directive.to_string(),
    })
}

/// Parse the tokens of a `header` directive into a rule.
///
/// Values may contain whitespace: tokens past the value position are
/// joined back together with single spaces.
fn parse_header_rule(tokens: &[&str], line: usize) -> ConfigResult<HeaderRule> {
    if tokens.len() < 2 {
        return Err(ConfigError::WrongArgumentCount {
            line,
            directive: "header".to_string(),
            expected: "an operation and a header name",
        });
    }

    let operation =
        HeaderOp::parse(tokens[1]).ok_or_else(|| ConfigError::UnknownHeaderOperation {
            line,
            operation: tokens[1].to_string(),
        })?;

    if operation.takes_value() {
        if tokens.len() < 4 {
            return Err(ConfigError::WrongArgumentCount {
                line,
                directive: "header".to_string(),
                expected: "a header name and value",
            });
        }
        Ok(HeaderRule {
            operation,
            name: tokens[2].to_string(),
            value: tokens[3..].join(" "),
        })
    } else {
        if tokens.len() != 3 {
            return Err(ConfigError::WrongArgumentCount {
                line,
                directive: "header".to_string(),
                expected: "a header name and no value",
            });
        }
        Ok(HeaderRule {
            operation,
            name: tokens[2].to_string(),
            value: String::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input_yields_no_routes() {
        let routes = parse_str("").unwrap();
        assert!(routes.is_empty());
    }

    #[test]
    fn test_comments_and_blank_lines_ignored() {
        let routes = parse_str("# just a comment\n\n   \n").unwrap();
        assert!(routes.is_empty());
    }

    #[test]
    fn test_errors_on_unknown_line() {
        assert!(matches!(
            parse_str("error please"),
            Err(ConfigError::UnknownDirective { line: 1, .. })
        ));
    }

    #[test]
    fn test_errors_on_upstream_outside_route() {
        assert!(matches!(
            parse_str("upstream localhost:8080"),
            Err(ConfigError::OutsideRoute { line: 1, .. })
        ));
    }

    #[test]
    fn test_errors_on_provider_outside_route() {
        assert!(matches!(
            parse_str("provider acme"),
            Err(ConfigError::OutsideRoute { .. })
        ));
    }

    #[test]
    fn test_errors_on_header_outside_route() {
        assert!(matches!(
            parse_str("header add x-test foo"),
            Err(ConfigError::OutsideRoute { .. })
        ));
    }

    #[test]
    fn test_errors_on_route_without_domains() {
        assert!(matches!(
            parse_str("route"),
            Err(ConfigError::MissingRouteDomains { line: 1 })
        ));
    }

    #[test]
    fn test_errors_on_header_with_too_few_arguments() {
        let input = "route example.com\n\theader nothing\n";
        assert!(parse_str(input).is_err());
    }

    #[test]
    fn test_errors_on_header_add_without_value() {
        let input = "route example.com\n\theader add x-test\n";
        assert!(matches!(
            parse_str(input),
            Err(ConfigError::WrongArgumentCount { line: 2, .. })
        ));
    }

    #[test]
    fn test_errors_on_header_replace_without_value() {
        let input = "route example.com\n\theader replace x-test\n";
        assert!(parse_str(input).is_err());
    }

    #[test]
    fn test_errors_on_header_default_without_value() {
        let input = "route example.com\n\theader default x-test\n";
        assert!(parse_str(input).is_err());
    }

    #[test]
    fn test_errors_on_header_delete_with_value() {
        let input = "route example.com\n\theader delete x-test stray\n";
        assert!(parse_str(input).is_err());
    }

    #[test]
    fn test_errors_on_unknown_header_operation() {
        let input = "route example.com\n\theader munge x-test foo\n";
        assert!(matches!(
            parse_str(input),
            Err(ConfigError::UnknownHeaderOperation { line: 2, .. })
        ));
    }

    #[test]
    fn test_errors_on_multiple_upstreams() {
        let input = "route example.com\n\tupstream server1\n\tupstream server2\n";
        assert!(matches!(
            parse_str(input),
            Err(ConfigError::DuplicateDirective { line: 3, .. })
        ));
    }

    #[test]
    fn test_errors_on_multiple_providers() {
        let input = "route example.com\n\tprovider acme\n\tprovider other\n";
        assert!(matches!(
            parse_str(input),
            Err(ConfigError::DuplicateDirective { line: 3, .. })
        ));
    }

    #[test]
    fn test_returns_routes() {
        let routes = parse_str(
            "\n\
             # Comment\n\
             route example.com www.example.com\n\
             \t# Indented comment\n\
             \tupstream localhost:8080\n\
             \theader add x-test foo\n\
             \theader delete x-test-2\n\
             \tprovider p1\n\
             \n\
             route example.net\n\
             \tupstream localhost:8081\n\
             \theader default x-test-3 bar\n\
             \theader replace x-test-4 baz\n",
        )
        .unwrap();

        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].domains, vec!["example.com", "www.example.com"]);
        assert_eq!(routes[0].upstream.as_deref(), Some("localhost:8080"));
        assert_eq!(routes[0].provider.as_deref(), Some("p1"));
        assert_eq!(routes[1].domains, vec!["example.net"]);
        assert_eq!(routes[1].upstream.as_deref(), Some("localhost:8081"));
        assert_eq!(routes[1].provider, None);

        assert_eq!(routes[0].headers.len(), 2);
        assert_eq!(
            routes[0].headers[0],
            HeaderRule {
                operation: HeaderOp::Add,
                name: "x-test".to_string(),
                value: "foo".to_string(),
            }
        );
        assert_eq!(
            routes[0].headers[1],
            HeaderRule {
                operation: HeaderOp::Delete,
                name: "x-test-2".to_string(),
                value: String::new(),
            }
        );

        assert_eq!(routes[1].headers.len(), 2);
        assert_eq!(
            routes[1].headers[0],
            HeaderRule {
                operation: HeaderOp::Default,
                name: "x-test-3".to_string(),
                value: "bar".to_string(),
            }
        );
        assert_eq!(
            routes[1].headers[1],
            HeaderRule {
                operation: HeaderOp::Replace,
                name: "x-test-4".to_string(),
                value: "baz".to_string(),
            }
        );
    }

    #[test]
    fn test_parses_case_insensitively() {
        let routes = parse_str(
            "RoUtE example.com www.example.com\n\
             \tUpStReAm localhost:8080\n\
             \tHeAdEr AdD x-test foo\n\
             \thEaDeR dElEtE x-test-2\n\
             \tPrOvIdEr p1\n\
             rOuTe example.net\n\
             \tuPsTrEaM localhost:8081\n\
             \tHeAdEr DeFaUlT x-test-3 bar\n\
             \thEaDeR rEpLaCe x-test-4 baz\n",
        )
        .unwrap();

        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].domains, vec!["example.com", "www.example.com"]);
        assert_eq!(routes[0].upstream.as_deref(), Some("localhost:8080"));
        assert_eq!(routes[0].provider.as_deref(), Some("p1"));
        assert_eq!(routes[0].headers[0].operation, HeaderOp::Add);
        assert_eq!(routes[0].headers[1].operation, HeaderOp::Delete);
        assert_eq!(routes[1].headers[0].operation, HeaderOp::Default);
        assert_eq!(routes[1].headers[1].operation, HeaderOp::Replace);
    }

    #[test]
    fn test_domain_case_preserved_for_manager() {
        // Lowercasing is the manager's job, not the parser's.
        let routes = parse_str("route EXAMPLE.com\n").unwrap();
        assert_eq!(routes[0].domains, vec!["EXAMPLE.com"]);
    }

    #[test]
    fn test_header_value_may_contain_spaces() {
        let routes = parse_str(
            "route example.com\n\theader add content-security-policy default-src 'self'\n",
        )
        .unwrap();
        assert_eq!(routes[0].headers[0].value, "default-src 'self'");
    }

    #[test]
    fn test_route_without_upstream_parses() {
        let routes = parse_str("route example.com\n\tprovider p1\n").unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].upstream, None);
    }

    #[test]
    fn test_parse_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("centauri.conf");
        std::fs::write(&path, "route example.com\n\tupstream localhost:8080\n").unwrap();

        let routes = parse_file(&path).unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].upstream.as_deref(), Some("localhost:8080"));
    }

    #[test]
    fn test_parse_file_missing() {
        assert!(matches!(
            parse_file("/nonexistent/centauri.conf"),
            Err(ConfigError::Read { .. })
        ));
    }
}
