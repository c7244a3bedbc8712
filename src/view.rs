use crate::error::Result;
use serde_json::Value;

/// Template renderer used by the `render` operation.
///
/// Any `Fn(&str, &Value) -> Result<String>` is a view.
pub trait View: Send + Sync + 'static {
    fn render(&self, template: &str, data: &Value) -> Result<String>;
}

impl<F> View for F
where
    F: Fn(&str, &Value) -> Result<String> + Send + Sync + 'static,
{
    fn render(&self, template: &str, data: &Value) -> Result<String> {
        (self)(template, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Greeting;

    impl View for Greeting {
        fn render(&self, template: &str, data: &Value) -> Result<String> {
            let name = data["name"].as_str().unwrap_or("stranger");
            Ok(format!("{}: Hello, {}!", template, name))
        }
    }

    #[test]
    fn test_struct_and_closure_views() {
        assert_eq!(
            Greeting.render("hello", &json!({ "name": "Bob" })).unwrap(),
            "hello: Hello, Bob!"
        );

        let upper = |template: &str, _: &Value| -> Result<String> { Ok(template.to_uppercase()) };
        assert_eq!(upper.render("page", &Value::Null).unwrap(), "PAGE");
    }
}
