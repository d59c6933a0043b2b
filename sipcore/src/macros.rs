macro_rules! lookup_table {
    ($name:ident => $( $slice:expr ),+) => {
        const $name: [bool; 256] = {
            let mut arr = [false; 256];
            $(
                let mut i = 0;
                while i < $slice.len() {
                    arr[$slice[i] as usize] = true;
                    i += 1;
                }
            )*
            arr
        };
    };
}

/// Evaluates `$body` once, then again after every `COMMA` separator.
macro_rules! comma_separated {
    ($grammar:ident => $body:expr) => {{
        $body;
        while $grammar.comma() {
            $body;
        }
    }};
}

/// Evaluates `$body` after every `SEMI` separator.
macro_rules! semi_separated {
    ($grammar:ident => $body:expr) => {{
        while $grammar.semi() {
            $body;
        }
    }};
}

pub(crate) use comma_separated;
pub(crate) use lookup_table;
pub(crate) use semi_separated;
