/// A colon-style path template rewritten into axum's `{param}` syntax
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertedPath {
    pub path: String,
    /// Parameter names in order of appearance
    pub params: Vec<String>,
}

impl ConvertedPath {
    /// The path with every parameter name erased, used to spot templates axum would
    /// treat as the same route
    pub fn shape(&self) -> String {
        let mut shape = String::with_capacity(self.path.len());
        let mut in_param = false;
        for c in self.path.chars() {
            match c {
                '{' => {
                    in_param = true;
                    shape.push_str("{}");
                }
                '}' => in_param = false,
                _ if in_param => {}
                _ => shape.push(c),
            }
        }
        shape
    }
}

/// Convert `/users/:id/posts/:post_id` into `/users/{id}/posts/{post_id}` in one left to
/// right scan. A parameter name runs from `:` to the next `/` or the end of the template
/// and may only hold ASCII letters, digits and `_`. Braces are reserved for the router.
pub fn convert_path(template: &str) -> Result<ConvertedPath, String> {
    if !template.starts_with('/') {
        return Err(format!("path `{}` must start with '/'", template));
    }

    let mut path = String::with_capacity(template.len() + 8);
    let mut params = Vec::new();
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '{' || c == '}' {
            return Err(format!("path `{}` contains a reserved `{}`", template, c));
        }
        if c != ':' {
            path.push(c);
            continue;
        }

        let mut name = String::new();
        while let Some(&next) = chars.peek() {
            if next == '/' {
                break;
            }
            name.push(next);
            chars.next();
        }
        if name.is_empty() {
            return Err(format!("path `{}` has a parameter without a name", template));
        }
        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(format!(
                "path `{}` has an invalid parameter name `{}`",
                template, name
            ));
        }

        path.push('{');
        path.push_str(&name);
        path.push('}');
        params.push(name);
    }

    Ok(ConvertedPath { path, params })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_parameters() {
        let converted = convert_path("/users/:id/posts/:post_id").unwrap();
        assert_eq!(converted.path, "/users/{id}/posts/{post_id}");
        assert_eq!(converted.params, vec!["id", "post_id"]);
    }

    #[test]
    fn test_static_paths_unchanged() {
        for path in ["/", "/health", "/users/me/settings"] {
            let converted = convert_path(path).unwrap();
            assert_eq!(converted.path, path);
            assert!(converted.params.is_empty());
        }
    }

    #[test]
    fn test_parameter_positions_preserved() {
        let templates = ["/:a", "/x/:a/y/:b/z", "/:a/:b/:c", "/orgs/:org/users/:id/"];
        for template in templates {
            let converted = convert_path(template).unwrap();
            let colon_count = template.matches(':').count();
            assert_eq!(converted.params.len(), colon_count);
            assert_eq!(converted.path.matches('{').count(), colon_count);

            let original: Vec<_> = template.split('/').collect();
            let rewritten: Vec<_> = converted.path.split('/').collect();
            assert_eq!(original.len(), rewritten.len());
            for (before, after) in original.iter().zip(&rewritten) {
                match before.strip_prefix(':') {
                    Some(name) => assert_eq!(*after, format!("{{{}}}", name)),
                    None => assert_eq!(before, after),
                }
            }
        }
    }

    #[test]
    fn test_invalid_templates() {
        assert!(convert_path("users/:id").is_err());
        assert!(convert_path("/users/:").is_err());
        assert!(convert_path("/users/:/posts").is_err());
        assert!(convert_path("/a/{b").is_err());
        assert!(convert_path("/a/b}").is_err());
        assert!(convert_path("/a/:x}").is_err());
        assert!(convert_path("/a/:x-:y").is_err());
        assert!(convert_path("/files/:*rest").is_err());

        assert_eq!(
            convert_path("/a/:x}").unwrap_err(),
            "path `/a/:x}` has an invalid parameter name `x}`"
        );
    }

    #[test]
    fn test_shape_ignores_parameter_names() {
        let a = convert_path("/users/:id").unwrap();
        let b = convert_path("/users/:user_id").unwrap();
        let c = convert_path("/users/me").unwrap();
        assert_eq!(a.shape(), b.shape());
        assert_ne!(a.shape(), c.shape());
    }
}
