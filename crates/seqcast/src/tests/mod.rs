mod broadcast_test;
