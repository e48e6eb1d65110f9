/// Self-contained keymap: no include paths needed to compile it.
pub(crate) const TEST_KEYMAP: &str = r#"xkb_keymap {
    xkb_keycodes "test" {
        minimum = 8;
        maximum = 255;
        <AE01> = 10;
        <AE02> = 11;
        <AC01> = 38;
        <SPCE> = 65;
    };
    xkb_types "test" {
        type "ONE_LEVEL" {
            modifiers = none;
            level_name[Level1] = "Any";
        };
        type "TWO_LEVEL" {
            modifiers = Shift;
            map[Shift] = Level2;
            level_name[Level1] = "Base";
            level_name[Level2] = "Shift";
        };
        type "FOUR_LEVEL" {
            modifiers = Shift+Mod5;
            map[Shift] = Level2;
            map[Mod5] = Level3;
            map[Shift+Mod5] = Level4;
            level_name[Level1] = "Base";
            level_name[Level2] = "Shift";
            level_name[Level3] = "Alt Base";
            level_name[Level4] = "Shift Alt";
        };
    };
    xkb_compatibility "test" {
    };
    xkb_symbols "test" {
        key <AE01> { type = "TWO_LEVEL", [ 1, exclam ] };
        key <AE02> { type = "TWO_LEVEL", [ 2, at ] };
        key <AC01> { type = "FOUR_LEVEL", [ a, A, ae, AE ] };
        key <SPCE> { type = "ONE_LEVEL", [ space ] };
    };
};
"#;
