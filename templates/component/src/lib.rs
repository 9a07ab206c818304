wit_bindgen::generate!({
    world: "component",
    path: "wit",
});

use exports::{{namespace_snake}}::{{component_snake}}::api::Guest;

struct Component;

impl Guest for Component {
    fn greet(name: String) -> String {
        format!("hello, {name}!")
    }
}

export!(Component);
