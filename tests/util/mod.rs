pub mod test_net;
